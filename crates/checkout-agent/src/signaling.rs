//! Gateway operations the agents depend on, as traits so the orchestrator
//! and pollers can run against the HTTP client or a scripted double.

use async_trait::async_trait;
use checkout_common::{IceCandidate, Role, SessionDescription};

use crate::error::AgentResult;

#[async_trait]
pub trait SignalingApi: Send + Sync {
    async fn publish_offer(&self, session_id: &str, offer: &SessionDescription) -> AgentResult<()>;

    /// `None` while nothing has been published yet.
    async fn fetch_offer(&self, session_id: &str) -> AgentResult<Option<SessionDescription>>;

    async fn publish_answer(&self, session_id: &str, answer: &SessionDescription)
        -> AgentResult<()>;

    async fn fetch_answer(&self, session_id: &str) -> AgentResult<Option<SessionDescription>>;

    async fn push_candidate(
        &self,
        session_id: &str,
        role: Role,
        candidate: &IceCandidate,
    ) -> AgentResult<()>;

    /// Every candidate `role` has published so far, oldest first.
    async fn fetch_candidates(&self, session_id: &str, role: Role)
        -> AgentResult<Vec<IceCandidate>>;
}

#[async_trait]
pub trait FrameRelayApi: Send + Sync {
    async fn publish_barcode(&self, device_id: &str, barcode: &str) -> AgentResult<()>;

    /// Read-once: a delivered barcode is gone for every other reader.
    async fn consume_barcode(&self, device_id: &str) -> AgentResult<Option<String>>;

    async fn publish_frame(&self, device_id: &str, image_data: &str) -> AgentResult<()>;

    async fn fetch_frame(&self, device_id: &str) -> AgentResult<Option<String>>;
}
