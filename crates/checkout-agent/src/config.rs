use std::time::Duration;

use checkout_common::helpers::env_millis;

/// Polling cadence and deadlines for the orchestrator and relay pollers.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub offer_poll: Duration,
    pub answer_poll: Duration,
    pub ice_poll: Duration,
    /// Deadline for offer/answer exchange and connection establishment.
    pub negotiation_timeout: Duration,
    pub frame_publish: Duration,
    pub frame_poll: Duration,
    pub barcode_poll: Duration,
    pub status_poll: Duration,
    /// Local candidates keep being pushed this long after connecting.
    pub trickle_grace: Duration,
    pub ice_servers: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            offer_poll: Duration::from_secs(1),
            answer_poll: Duration::from_secs(1),
            ice_poll: Duration::from_secs(1),
            negotiation_timeout: Duration::from_secs(10),
            frame_publish: Duration::from_millis(200),
            frame_poll: Duration::from_millis(200),
            barcode_poll: Duration::from_millis(500),
            status_poll: Duration::from_secs(2),
            trickle_grace: Duration::from_secs(2),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let ice_servers = match std::env::var("CHECKOUT_AGENT_ICE_SERVERS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => d.ice_servers,
        };
        Self {
            offer_poll: env_millis("CHECKOUT_AGENT_OFFER_POLL_MS", d.offer_poll),
            answer_poll: env_millis("CHECKOUT_AGENT_ANSWER_POLL_MS", d.answer_poll),
            ice_poll: env_millis("CHECKOUT_AGENT_ICE_POLL_MS", d.ice_poll),
            negotiation_timeout: env_millis(
                "CHECKOUT_AGENT_NEGOTIATION_TIMEOUT_MS",
                d.negotiation_timeout,
            ),
            frame_publish: env_millis("CHECKOUT_AGENT_FRAME_PUBLISH_MS", d.frame_publish),
            frame_poll: env_millis("CHECKOUT_AGENT_FRAME_POLL_MS", d.frame_poll),
            barcode_poll: env_millis("CHECKOUT_AGENT_BARCODE_POLL_MS", d.barcode_poll),
            status_poll: env_millis("CHECKOUT_AGENT_STATUS_POLL_MS", d.status_poll),
            trickle_grace: env_millis("CHECKOUT_AGENT_TRICKLE_GRACE_MS", d.trickle_grace),
            ice_servers,
        }
    }
}
