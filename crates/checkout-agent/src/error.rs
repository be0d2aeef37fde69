use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Network failure or unexpected gateway response.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by gateway: {0}")]
    Validation(String),

    #[error("session has been closed")]
    SessionClosed,

    /// Mailbox backend unavailable; the gateway answered 503.
    #[error("gateway storage error: {0}")]
    Storage(String),

    /// The gateway holds a mailbox entry it cannot decode.
    #[error("gateway holds corrupt data: {0}")]
    Corrupt(String),

    #[error("peer connection error: {0}")]
    Peer(String),

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("negotiation timed out")]
    NegotiationTimeout,

    #[error("catalog error: {0}")]
    Catalog(String),
}

impl AgentError {
    /// Failures a polling loop retries on its next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Transport(_) | AgentError::Storage(_))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}

impl From<checkout_common::Error> for AgentError {
    fn from(err: checkout_common::Error) -> Self {
        AgentError::Validation(err.to_string())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
