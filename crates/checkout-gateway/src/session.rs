//! Checkout session lifecycle: creation with a QR join link, the phone's
//! join acknowledgement, status, and explicit teardown.

use std::sync::Arc;

use checkout_common::helpers::{is_valid_session_id, new_session_id, now_ms};
use checkout_common::{ConnectResponse, NewSessionResponse, SessionStatus};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TtlConfig;
use crate::error::RelayError;
use crate::metrics::{incr, RelayMetrics};
use crate::store::{get_json, put_json, MailboxKey, MailboxStore, Namespace, SharedStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerMarker {
    phone_id: String,
    joined_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClosedMarker {
    closed_at_ms: i64,
}

pub fn validate_session_id(session_id: &str) -> Result<(), RelayError> {
    if session_id.is_empty() {
        return Err(RelayError::validation("sessionId is required"));
    }
    if !is_valid_session_id(session_id) {
        return Err(RelayError::validation("Invalid sessionId"));
    }
    Ok(())
}

/// Reject writes into a session that was torn down.
pub async fn ensure_open(store: &dyn MailboxStore, session_id: &str) -> Result<(), RelayError> {
    let key = MailboxKey::new(Namespace::Closed, session_id);
    if store.get(&key).await?.is_some() {
        return Err(RelayError::SessionClosed(session_id.to_string()));
    }
    Ok(())
}

/// Remove `written` again if the session was torn down while it was being
/// stored.
pub async fn recheck_open(
    store: &dyn MailboxStore,
    session_id: &str,
    written: &MailboxKey,
) -> Result<(), RelayError> {
    if let Err(err) = ensure_open(store, session_id).await {
        store.delete(written).await?;
        return Err(err);
    }
    Ok(())
}

pub struct SessionService {
    store: SharedStore,
    public_base_url: String,
    ttl: TtlConfig,
    metrics: Arc<RelayMetrics>,
}

impl SessionService {
    pub fn new(
        store: SharedStore,
        public_base_url: impl Into<String>,
        ttl: TtlConfig,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into(),
            ttl,
            metrics,
        }
    }

    pub fn join_url(&self, session_id: &str) -> String {
        format!(
            "{}/phone-scan?deviceId={}",
            self.public_base_url.trim_end_matches('/'),
            session_id
        )
    }

    pub fn create(&self) -> Result<NewSessionResponse, RelayError> {
        let session_id = new_session_id();
        let join_url = self.join_url(&session_id);
        let code = QrCode::new(join_url.as_bytes())
            .map_err(|e| RelayError::Internal(format!("QR encoding failed: {e}")))?;
        let qr_svg = code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .build();

        incr(&self.metrics.sessions_created);
        info!(session_id = %session_id, "checkout session created");
        Ok(NewSessionResponse {
            session_id,
            join_url,
            qr_svg,
        })
    }

    pub async fn connect(
        &self,
        device_id: &str,
        phone_id: &str,
    ) -> Result<ConnectResponse, RelayError> {
        validate_session_id(device_id)?;
        if phone_id.is_empty() {
            return Err(RelayError::validation("phoneId is required"));
        }
        if !is_valid_session_id(phone_id) {
            return Err(RelayError::validation("Invalid phoneId"));
        }
        ensure_open(self.store.as_ref(), device_id).await?;

        let marker = PeerMarker {
            phone_id: phone_id.to_string(),
            joined_at_ms: now_ms(),
        };
        put_json(
            self.store.as_ref(),
            &MailboxKey::new(Namespace::Peer, device_id),
            &marker,
            self.ttl.peer_marker,
        )
        .await?;

        info!(device_id, phone_id, "phone joined session");
        Ok(ConnectResponse {
            ok: true,
            device_id: device_id.to_string(),
            phone_id: phone_id.to_string(),
        })
    }

    /// Join and teardown flags. The signaling phase is filled in by the
    /// signaling relay.
    pub async fn status(&self, session_id: &str) -> Result<SessionStatus, RelayError> {
        validate_session_id(session_id)?;
        let store = self.store.as_ref();
        let peer: Option<PeerMarker> =
            get_json(store, &MailboxKey::new(Namespace::Peer, session_id)).await?;
        let closed: Option<ClosedMarker> =
            get_json(store, &MailboxKey::new(Namespace::Closed, session_id)).await?;
        Ok(SessionStatus {
            phone_joined: peer.is_some(),
            closed: closed.is_some(),
            ..SessionStatus::default()
        })
    }

    /// Remove every mailbox of the session and leave a `closed` marker.
    /// Calling it twice is harmless.
    pub async fn teardown(&self, session_id: &str) -> Result<(), RelayError> {
        validate_session_id(session_id)?;
        let store = self.store.as_ref();
        // Marker first: a write that passed `ensure_open` is either cleared
        // below or sees the marker in `recheck_open`.
        put_json(
            store,
            &MailboxKey::new(Namespace::Closed, session_id),
            &ClosedMarker {
                closed_at_ms: now_ms(),
            },
            self.ttl.closed_marker,
        )
        .await?;
        for namespace in Namespace::SESSION_SCOPED {
            store.delete(&MailboxKey::new(namespace, session_id)).await?;
        }

        incr(&self.metrics.sessions_closed);
        info!(session_id, "checkout session torn down");
        Ok(())
    }
}
