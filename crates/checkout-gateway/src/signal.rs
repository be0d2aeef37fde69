//! WebRTC signaling relay.
//!
//! Offer and answer are single slots per session: a later publish replaces
//! the earlier one and reads never consume. ICE candidates accumulate per
//! role in publication order until the next offer clears them, so a poller
//! can re-read the whole list and skip what it has already applied.

use std::sync::Arc;

use checkout_common::{
    IceCandidate, Role, SdpType, SessionDescription, SignalingPhase, MAX_CANDIDATE_BYTES,
    MAX_SDP_BYTES,
};
use tracing::debug;

use crate::config::TtlConfig;
use crate::error::RelayError;
use crate::metrics::{incr, RelayMetrics};
use crate::session::{ensure_open, recheck_open, validate_session_id};
use crate::store::{
    append_json, get_json, put_json, read_list_json, MailboxKey, MailboxStore, Namespace,
    SharedStore,
};

fn validate_description(desc: &SessionDescription, expected: SdpType) -> Result<(), RelayError> {
    if desc.sdp_type != expected {
        return Err(RelayError::validation(format!(
            "Expected a session description of type {expected:?}"
        )));
    }
    if desc.sdp.trim().is_empty() {
        return Err(RelayError::validation("SDP is empty"));
    }
    if desc.sdp.len() > MAX_SDP_BYTES {
        return Err(RelayError::validation("Invalid SDP size"));
    }
    Ok(())
}

fn validate_candidate(candidate: &IceCandidate) -> Result<(), RelayError> {
    // An empty `candidate` string is the end-of-candidates marker.
    if candidate.candidate.len() > MAX_CANDIDATE_BYTES {
        return Err(RelayError::validation("Invalid ICE candidate size"));
    }
    if candidate.sdp_mid.as_ref().is_some_and(|mid| mid.len() > 64) {
        return Err(RelayError::validation("Invalid sdpMid"));
    }
    Ok(())
}

pub struct SignalingRelay {
    store: SharedStore,
    ttl: TtlConfig,
    metrics: Arc<RelayMetrics>,
}

impl SignalingRelay {
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

    pub async fn publish_offer(
        &self,
        session_id: &str,
        offer: &SessionDescription,
    ) -> Result<(), RelayError> {
        validate_session_id(session_id)?;
        validate_description(offer, SdpType::Offer)?;
        ensure_open(self.store(), session_id).await?;

        // A new offer starts a new negotiation; candidates gathered for the
        // previous one must not reach the new peer connections.
        for role in [Role::Web, Role::Phone] {
            self.store()
                .delete(&MailboxKey::new(Namespace::Ice(role), session_id))
                .await?;
        }
        let key = MailboxKey::new(Namespace::Offer, session_id);
        put_json(self.store(), &key, offer, self.ttl.offer).await?;
        recheck_open(self.store(), session_id, &key).await?;
        incr(&self.metrics.offers_published);
        debug!(session_id, sdp_bytes = offer.sdp.len(), "offer stored");
        Ok(())
    }

    pub async fn fetch_offer(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionDescription>, RelayError> {
        validate_session_id(session_id)?;
        let key = MailboxKey::new(Namespace::Offer, session_id);
        Ok(get_json(self.store(), &key).await?)
    }

    pub async fn publish_answer(
        &self,
        session_id: &str,
        answer: &SessionDescription,
    ) -> Result<(), RelayError> {
        validate_session_id(session_id)?;
        validate_description(answer, SdpType::Answer)?;
        ensure_open(self.store(), session_id).await?;

        let key = MailboxKey::new(Namespace::Answer, session_id);
        put_json(self.store(), &key, answer, self.ttl.answer).await?;
        recheck_open(self.store(), session_id, &key).await?;
        incr(&self.metrics.answers_published);
        debug!(session_id, sdp_bytes = answer.sdp.len(), "answer stored");
        Ok(())
    }

    pub async fn fetch_answer(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionDescription>, RelayError> {
        validate_session_id(session_id)?;
        let key = MailboxKey::new(Namespace::Answer, session_id);
        Ok(get_json(self.store(), &key).await?)
    }

    /// Append a candidate gathered by `role`. Each append re-arms the list TTL.
    pub async fn push_ice_candidate(
        &self,
        session_id: &str,
        role: Role,
        candidate: &IceCandidate,
    ) -> Result<(), RelayError> {
        validate_session_id(session_id)?;
        validate_candidate(candidate)?;
        ensure_open(self.store(), session_id).await?;

        let key = MailboxKey::new(Namespace::Ice(role), session_id);
        append_json(self.store(), &key, candidate, Some(self.ttl.ice)).await?;
        recheck_open(self.store(), session_id, &key).await?;
        incr(&self.metrics.candidates_pushed);
        debug!(session_id, role = %role, "ice candidate appended");
        Ok(())
    }

    /// All candidates published by `role`, oldest first. Empty, never absent.
    pub async fn fetch_ice_candidates(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<Vec<IceCandidate>, RelayError> {
        validate_session_id(session_id)?;
        let key = MailboxKey::new(Namespace::Ice(role), session_id);
        Ok(read_list_json(self.store(), &key).await?)
    }

    pub async fn phase(&self, session_id: &str) -> Result<SignalingPhase, RelayError> {
        validate_session_id(session_id)?;
        for role in [Role::Web, Role::Phone] {
            let key = MailboxKey::new(Namespace::Ice(role), session_id);
            if !self.store().read_list(&key).await?.is_empty() {
                return Ok(SignalingPhase::IceExchanging);
            }
        }
        if self.fetch_answer(session_id).await?.is_some() {
            return Ok(SignalingPhase::AnswerPublished);
        }
        if self.fetch_offer(session_id).await?.is_some() {
            return Ok(SignalingPhase::OfferPublished);
        }
        Ok(SignalingPhase::Idle)
    }
}
