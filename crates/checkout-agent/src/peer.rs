//! Peer connection seam.
//!
//! The orchestrator drives negotiation through [`PeerConnection`] and hears
//! back through [`PeerEvent`]s, so it never touches a WebRTC stack directly.

use std::sync::Arc;

use async_trait::async_trait;
use checkout_common::{IceCandidate, Role, SessionDescription};
use tokio::sync::mpsc;

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A candidate gathered locally that the remote side must learn about.
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
}

pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Offerer side: create an offer and install it as the local description.
    async fn create_offer(&self) -> AgentResult<SessionDescription>;

    /// Answerer side: apply the remote offer and return the local answer.
    async fn accept_offer(&self, offer: &SessionDescription) -> AgentResult<SessionDescription>;

    /// Offerer side: apply the remote answer.
    async fn apply_answer(&self, answer: &SessionDescription) -> AgentResult<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> AgentResult<()>;

    async fn close(&self) -> AgentResult<()>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Build a fresh connection for `role`. The phone side acquires its
    /// camera here and fails with `CameraUnavailable` when it cannot.
    async fn create(&self, role: Role, events: PeerEvents) -> AgentResult<Arc<dyn PeerConnection>>;
}

/// Factory for builds without a native WebRTC stack. Every attempt fails
/// straight away, so the orchestrator goes directly to the frame relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayOnlyPeers;

#[async_trait]
impl PeerFactory for RelayOnlyPeers {
    async fn create(&self, _role: Role, _events: PeerEvents) -> AgentResult<Arc<dyn PeerConnection>> {
        Err(AgentError::Peer("built without native WebRTC support".to_string()))
    }
}
