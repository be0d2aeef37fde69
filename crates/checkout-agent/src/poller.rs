//! Relay polling loops: the kiosk's barcode poller and frame viewer, and
//! the phone's frame pump.
//!
//! Every loop is cancellable by dropping its [`TaskGuard`]. Retryable
//! failures are logged and retried on the next tick; a closed session ends
//! the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::signaling::FrameRelayApi;

/// Aborts the wrapped task when dropped.
#[derive(Debug)]
pub struct TaskGuard(Option<JoinHandle<()>>);

impl TaskGuard {
    pub fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(Some(tokio::spawn(future)))
    }

    pub fn is_finished(&self) -> bool {
        self.0.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Abort and wait until the task has actually stopped.
    pub async fn cancel(mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            handle.abort();
        }
    }
}

/// Something that yields the phone camera's current frame as a data URL.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// `Ok(None)` when no frame is ready yet.
    async fn capture(&self) -> AgentResult<Option<String>>;
}

/// Where the kiosk renders relayed frames.
pub trait FrameSink: Send + Sync {
    fn show(&self, image_data: String);
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Deliver each consumed barcode to `scans` until the receiver goes away or
/// the session closes.
pub async fn run_barcode_poller(
    relay: Arc<dyn FrameRelayApi>,
    device_id: String,
    period: Duration,
    scans: mpsc::Sender<String>,
) -> AgentResult<()> {
    let mut ticker = ticker(period);
    loop {
        ticker.tick().await;
        match relay.consume_barcode(&device_id).await {
            Ok(Some(barcode)) => {
                debug!(device_id = %device_id, barcode = %barcode, "barcode received");
                if scans.send(barcode).await.is_err() {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(err) if err.is_retryable() => warn!("barcode poll failed, retrying: {}", err),
            Err(err) => return Err(err),
        }
    }
}

/// Kiosk fallback: show the latest relayed frame. An absent frame leaves
/// the last one on screen.
pub async fn run_frame_viewer(
    relay: Arc<dyn FrameRelayApi>,
    device_id: String,
    period: Duration,
    sink: Arc<dyn FrameSink>,
) -> AgentResult<()> {
    let mut ticker = ticker(period);
    let mut last: Option<String> = None;
    loop {
        ticker.tick().await;
        match relay.fetch_frame(&device_id).await {
            Ok(Some(frame)) => {
                if last.as_deref() != Some(frame.as_str()) {
                    last = Some(frame.clone());
                    sink.show(frame);
                }
            }
            Ok(None) => {}
            Err(err) if err.is_retryable() => debug!("frame poll failed, retrying: {}", err),
            Err(err) => return Err(err),
        }
    }
}

/// Phone fallback: publish a captured frame on every tick. Stops when the
/// kiosk tears the session down.
pub async fn run_frame_pump(
    relay: Arc<dyn FrameRelayApi>,
    device_id: String,
    period: Duration,
    source: Arc<dyn FrameSource>,
) -> AgentResult<()> {
    let mut ticker = ticker(period);
    loop {
        ticker.tick().await;
        let frame = match source.capture().await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err @ AgentError::CameraUnavailable(_)) => return Err(err),
            Err(err) => {
                warn!("frame capture failed: {}", err);
                continue;
            }
        };
        match relay.publish_frame(&device_id, &frame).await {
            Ok(()) => {}
            Err(AgentError::SessionClosed) => {
                info!(device_id = %device_id, "session closed, stopping frame pump");
                return Err(AgentError::SessionClosed);
            }
            Err(err) if err.is_retryable() => debug!("frame publish failed, retrying: {}", err),
            Err(err) => return Err(err),
        }
    }
}
