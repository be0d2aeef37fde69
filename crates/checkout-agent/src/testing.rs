//! In-memory gateway and scripted peers for agent unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use checkout_common::{IceCandidate, Role, SessionDescription};

use crate::error::{AgentError, AgentResult};
use crate::peer::{PeerConnection, PeerEvent, PeerEvents, PeerFactory, PeerState};
use crate::poller::{FrameSink, FrameSource};
use crate::signaling::{FrameRelayApi, SignalingApi};

#[derive(Default)]
struct Mailboxes {
    offers: HashMap<String, SessionDescription>,
    answers: HashMap<String, SessionDescription>,
    candidates: HashMap<(String, Role), Vec<IceCandidate>>,
    barcodes: HashMap<String, String>,
    frames: HashMap<String, String>,
}

#[derive(Default)]
pub struct MockGateway {
    boxes: Mutex<Mailboxes>,
    pub closed: AtomicBool,
    pub offer_fetches: AtomicUsize,
    pub answer_fetches: AtomicUsize,
    pub frame_fetches: AtomicUsize,
    pub frames_published: AtomicUsize,
    /// Fail this many calls with a retryable error before behaving.
    pub transient_failures: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check(&self) -> AgentResult<()> {
        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(AgentError::Transport("connection reset".into()));
        }
        Ok(())
    }

    fn check_open(&self) -> AgentResult<()> {
        self.check()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::SessionClosed);
        }
        Ok(())
    }

    pub fn set_offer(&self, session_id: &str, sdp: &str) {
        self.boxes
            .lock()
            .unwrap()
            .offers
            .insert(session_id.into(), SessionDescription::offer(sdp));
    }

    pub fn set_answer(&self, session_id: &str, sdp: &str) {
        self.boxes
            .lock()
            .unwrap()
            .answers
            .insert(session_id.into(), SessionDescription::answer(sdp));
    }

    pub fn offer(&self, session_id: &str) -> Option<SessionDescription> {
        self.boxes.lock().unwrap().offers.get(session_id).cloned()
    }

    pub fn answer(&self, session_id: &str) -> Option<SessionDescription> {
        self.boxes.lock().unwrap().answers.get(session_id).cloned()
    }

    pub fn candidates(&self, session_id: &str, role: Role) -> Vec<IceCandidate> {
        self.boxes
            .lock()
            .unwrap()
            .candidates
            .get(&(session_id.to_string(), role))
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_candidate(&self, session_id: &str, role: Role, candidate: &str) {
        self.boxes
            .lock()
            .unwrap()
            .candidates
            .entry((session_id.to_string(), role))
            .or_default()
            .push(IceCandidate::new(candidate));
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingApi for MockGateway {
    async fn publish_offer(&self, session_id: &str, offer: &SessionDescription) -> AgentResult<()> {
        self.check_open()?;
        let mut boxes = self.boxes.lock().unwrap();
        // Like the gateway, a new offer clears both candidate lists.
        boxes.candidates.retain(|(session, _), _| session != session_id);
        boxes.offers.insert(session_id.into(), offer.clone());
        Ok(())
    }

    async fn fetch_offer(&self, session_id: &str) -> AgentResult<Option<SessionDescription>> {
        self.offer_fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.offer(session_id))
    }

    async fn publish_answer(
        &self,
        session_id: &str,
        answer: &SessionDescription,
    ) -> AgentResult<()> {
        self.check_open()?;
        self.boxes
            .lock()
            .unwrap()
            .answers
            .insert(session_id.into(), answer.clone());
        Ok(())
    }

    async fn fetch_answer(&self, session_id: &str) -> AgentResult<Option<SessionDescription>> {
        self.answer_fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.answer(session_id))
    }

    async fn push_candidate(
        &self,
        session_id: &str,
        role: Role,
        candidate: &IceCandidate,
    ) -> AgentResult<()> {
        self.check_open()?;
        self.boxes
            .lock()
            .unwrap()
            .candidates
            .entry((session_id.to_string(), role))
            .or_default()
            .push(candidate.clone());
        Ok(())
    }

    async fn fetch_candidates(
        &self,
        session_id: &str,
        role: Role,
    ) -> AgentResult<Vec<IceCandidate>> {
        self.check()?;
        Ok(self.candidates(session_id, role))
    }
}

#[async_trait]
impl FrameRelayApi for MockGateway {
    async fn publish_barcode(&self, device_id: &str, barcode: &str) -> AgentResult<()> {
        self.check_open()?;
        self.boxes
            .lock()
            .unwrap()
            .barcodes
            .insert(device_id.into(), barcode.into());
        Ok(())
    }

    async fn consume_barcode(&self, device_id: &str) -> AgentResult<Option<String>> {
        self.check()?;
        Ok(self.boxes.lock().unwrap().barcodes.remove(device_id))
    }

    async fn publish_frame(&self, device_id: &str, image_data: &str) -> AgentResult<()> {
        self.check_open()?;
        self.frames_published.fetch_add(1, Ordering::SeqCst);
        self.boxes
            .lock()
            .unwrap()
            .frames
            .insert(device_id.into(), image_data.into());
        Ok(())
    }

    async fn fetch_frame(&self, device_id: &str) -> AgentResult<Option<String>> {
        self.frame_fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.boxes.lock().unwrap().frames.get(device_id).cloned())
    }
}

/// When a scripted peer reports `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectWhen {
    /// As soon as the offer/answer exchange completes.
    Negotiated,
    /// After this many remote candidates were applied.
    Candidates(usize),
    Never,
}

pub struct ScriptedPeer {
    events: PeerEvents,
    connect: ConnectWhen,
    local_candidates: Vec<IceCandidate>,
    pub answers_applied: AtomicUsize,
    pub offers_accepted: AtomicUsize,
    pub remote_candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicBool,
}

impl ScriptedPeer {
    /// Local candidates appear once a local description is set.
    fn gather(&self) {
        for candidate in &self.local_candidates {
            let _ = self
                .events
                .send(PeerEvent::LocalCandidate(candidate.clone()));
        }
    }

    fn negotiated(&self) {
        let _ = self
            .events
            .send(PeerEvent::StateChanged(PeerState::Connecting));
        if self.connect == ConnectWhen::Negotiated {
            let _ = self.events.send(PeerEvent::StateChanged(PeerState::Connected));
        }
    }

    pub fn remote_candidate_count(&self) -> usize {
        self.remote_candidates.lock().unwrap().len()
    }

    pub fn remote_candidate_strings(&self) -> Vec<String> {
        self.remote_candidates
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }
}

#[async_trait]
impl PeerConnection for ScriptedPeer {
    async fn create_offer(&self) -> AgentResult<SessionDescription> {
        self.gather();
        Ok(SessionDescription::offer("v=0 kiosk-offer"))
    }

    async fn accept_offer(&self, _offer: &SessionDescription) -> AgentResult<SessionDescription> {
        self.offers_accepted.fetch_add(1, Ordering::SeqCst);
        self.gather();
        self.negotiated();
        Ok(SessionDescription::answer("v=0 phone-answer"))
    }

    async fn apply_answer(&self, _answer: &SessionDescription) -> AgentResult<()> {
        self.answers_applied.fetch_add(1, Ordering::SeqCst);
        self.negotiated();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> AgentResult<()> {
        let applied = {
            let mut remote = self.remote_candidates.lock().unwrap();
            remote.push(candidate.clone());
            remote.len()
        };
        if self.connect == ConnectWhen::Candidates(applied) {
            let _ = self.events.send(PeerEvent::StateChanged(PeerState::Connected));
        }
        Ok(())
    }

    async fn close(&self) -> AgentResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedPeerFactory {
    connect: ConnectWhen,
    /// Per-peer overrides, used in creation order before `connect`.
    script: Mutex<VecDeque<ConnectWhen>>,
    camera_denied: bool,
    local_candidates: Vec<IceCandidate>,
    pub created: Mutex<Vec<Arc<ScriptedPeer>>>,
}

impl ScriptedPeerFactory {
    pub fn new(connect: ConnectWhen) -> Arc<Self> {
        Arc::new(Self {
            connect,
            script: Mutex::new(VecDeque::new()),
            camera_denied: false,
            local_candidates: vec![IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.5 50000 typ host")],
            created: Mutex::new(Vec::new()),
        })
    }

    /// Peers behave as listed, one per attempt; later ones repeat `then`.
    pub fn scripted(script: Vec<ConnectWhen>, then: ConnectWhen) -> Arc<Self> {
        let factory = Self::new(then);
        factory.script.lock().unwrap().extend(script);
        factory
    }

    pub fn camera_denied() -> Arc<Self> {
        Arc::new(Self {
            connect: ConnectWhen::Never,
            script: Mutex::new(VecDeque::new()),
            camera_denied: true,
            local_candidates: Vec::new(),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn peer(&self, index: usize) -> Arc<ScriptedPeer> {
        self.created.lock().unwrap()[index].clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerFactory for ScriptedPeerFactory {
    async fn create(&self, _role: Role, events: PeerEvents) -> AgentResult<Arc<dyn PeerConnection>> {
        if self.camera_denied {
            return Err(AgentError::CameraUnavailable("permission denied".into()));
        }
        let connect = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.connect);
        let peer = Arc::new(ScriptedPeer {
            events,
            connect,
            local_candidates: self.local_candidates.clone(),
            answers_applied: AtomicUsize::new(0),
            offers_accepted: AtomicUsize::new(0),
            remote_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.created.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub frames: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn shown(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameSink for RecordingSink {
    fn show(&self, image_data: String) {
        self.frames.lock().unwrap().push(image_data);
    }
}

/// Yields a fixed frame, or fails as if the camera permission was revoked.
pub struct StaticSource {
    pub frame: String,
    pub denied: AtomicBool,
    pub captures: AtomicUsize,
}

impl StaticSource {
    pub fn new(frame: &str) -> Arc<Self> {
        Arc::new(Self {
            frame: frame.to_string(),
            denied: AtomicBool::new(false),
            captures: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FrameSource for StaticSource {
    async fn capture(&self) -> AgentResult<Option<String>> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.denied.load(Ordering::SeqCst) {
            return Err(AgentError::CameraUnavailable("track ended".into()));
        }
        Ok(Some(self.frame.clone()))
    }
}
