//! Frame relay: barcodes and video frames pushed by the phone when the
//! peer connection is not (yet) carrying them.
//!
//! Barcodes are read-once, consumed atomically so two kiosk polls cannot
//! both see the same scan. Frames are read non-destructively and dropped
//! once older than their TTL, which covers stores whose expiry is lazy.

use std::sync::Arc;
use std::time::Duration;

use checkout_common::helpers::now_ms;
use checkout_common::{MAX_BARCODE_BYTES, MAX_FRAME_BYTES};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TtlConfig;
use crate::error::RelayError;
use crate::metrics::{incr, RelayMetrics};
use crate::session::{ensure_open, recheck_open, validate_session_id};
use crate::store::{get_json, put_json, take_json, MailboxKey, MailboxStore, Namespace, SharedStore};

/// Stored payload plus the wall-clock time it was published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stamped {
    value: String,
    published_at_ms: i64,
}

impl Stamped {
    fn now(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            published_at_ms: now_ms(),
        }
    }

    fn is_fresh(&self, ttl: Duration, now_ms: i64) -> bool {
        let age = now_ms.saturating_sub(self.published_at_ms);
        age <= ttl.as_millis() as i64
    }
}

fn validate_barcode(barcode: &str) -> Result<&str, RelayError> {
    let barcode = barcode.trim();
    if barcode.is_empty() {
        return Err(RelayError::validation("barcode is required"));
    }
    if barcode.len() > MAX_BARCODE_BYTES || barcode.chars().any(char::is_control) {
        return Err(RelayError::validation("Invalid barcode"));
    }
    Ok(barcode)
}

fn validate_frame(image_data: &str) -> Result<(), RelayError> {
    if image_data.is_empty() {
        return Err(RelayError::validation("imageData is required"));
    }
    if image_data.len() > MAX_FRAME_BYTES {
        return Err(RelayError::validation("Frame too large"));
    }
    Ok(())
}

pub struct FrameRelay {
    store: SharedStore,
    ttl: TtlConfig,
    metrics: Arc<RelayMetrics>,
}

impl FrameRelay {
    pub fn new(store: SharedStore, ttl: TtlConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            store,
            ttl,
            metrics,
        }
    }

    fn store(&self) -> &dyn MailboxStore {
        self.store.as_ref()
    }

    pub async fn publish_barcode(&self, device_id: &str, barcode: &str) -> Result<(), RelayError> {
        validate_session_id(device_id)?;
        let barcode = validate_barcode(barcode)?;
        ensure_open(self.store(), device_id).await?;

        let key = MailboxKey::new(Namespace::Barcode, device_id);
        put_json(self.store(), &key, &Stamped::now(barcode), self.ttl.barcode).await?;
        recheck_open(self.store(), device_id, &key).await?;
        incr(&self.metrics.barcodes_published);
        debug!(device_id, barcode, "barcode published");
        Ok(())
    }

    /// Pending barcode, removed in the same step. A second call sees `None`.
    pub async fn consume_barcode(&self, device_id: &str) -> Result<Option<String>, RelayError> {
        validate_session_id(device_id)?;
        let key = MailboxKey::new(Namespace::Barcode, device_id);
        let Some(stamped) = take_json::<Stamped>(self.store(), &key).await? else {
            return Ok(None);
        };
        if !stamped.is_fresh(self.ttl.barcode, now_ms()) {
            incr(&self.metrics.barcodes_stale);
            debug!(device_id, "dropped stale barcode");
            return Ok(None);
        }
        incr(&self.metrics.barcodes_consumed);
        Ok(Some(stamped.value))
    }

    pub async fn publish_frame(&self, device_id: &str, image_data: &str) -> Result<(), RelayError> {
        validate_session_id(device_id)?;
        validate_frame(image_data)?;
        ensure_open(self.store(), device_id).await?;

        let key = MailboxKey::new(Namespace::VideoFrame, device_id);
        put_json(self.store(), &key, &Stamped::now(image_data), self.ttl.frame).await?;
        recheck_open(self.store(), device_id, &key).await?;
        incr(&self.metrics.frames_published);
        Ok(())
    }

    /// Latest frame if it is younger than the frame TTL. Stale frames are
    /// deleted on the way out.
    pub async fn fetch_frame(&self, device_id: &str) -> Result<Option<String>, RelayError> {
        validate_session_id(device_id)?;
        let key = MailboxKey::new(Namespace::VideoFrame, device_id);
        let Some(stamped) = get_json::<Stamped>(self.store(), &key).await? else {
            return Ok(None);
        };
        if !stamped.is_fresh(self.ttl.frame, now_ms()) {
            self.store().delete(&key).await?;
            incr(&self.metrics.frames_stale);
            return Ok(None);
        }
        incr(&self.metrics.frames_served);
        Ok(Some(stamped.value))
    }
}
