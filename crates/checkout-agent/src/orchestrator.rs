//! Peer connection orchestrator.
//!
//! Kiosk: `Init -> CreatingOffer -> AwaitingAnswer -> ExchangingIce ->
//! StreamReceived | TimedOut -> FramePolling`.
//! Phone: `Init -> AwaitingOffer -> Answering -> ExchangingIce ->
//! StreamReceived | TimedOut -> FramePolling`.
//!
//! Each negotiation runs as one attempt owned by the orchestrator. Starting
//! a new attempt cancels the previous one, with its peer connection and
//! polling loops, before anything else happens. Negotiation races the
//! deadline; when the deadline wins the attempt is torn down and the frame
//! relay takes over. At most one frame relay loop runs at a time, and a peer
//! connection that goes live stops it.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use checkout_common::helpers::is_valid_session_id;
use checkout_common::{IceCandidate, Role, SessionDescription};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{AgentError, AgentResult};
use crate::peer::{PeerConnection, PeerEvent, PeerFactory, PeerState};
use crate::poller::{run_frame_pump, run_frame_viewer, FrameSink, FrameSource, TaskGuard};
use crate::signaling::{FrameRelayApi, SignalingApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    CameraUnavailable(String),
    InvalidSession(String),
    /// Deadline passed with no frame relay to fall back to.
    Timeout,
    /// Negotiation broke off with no frame relay to fall back to.
    Peer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Init,
    CreatingOffer,
    AwaitingOffer,
    AwaitingAnswer,
    Answering,
    ExchangingIce,
    StreamReceived,
    TimedOut,
    FramePolling,
    Failed(Failure),
    Closed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::StreamReceived | Phase::FramePolling | Phase::Failed(_) | Phase::Closed
        )
    }
}

/// What happens once peer-to-peer negotiation gives up.
pub enum Fallback {
    /// Kiosk: poll relayed frames and render them.
    View {
        relay: Arc<dyn FrameRelayApi>,
        sink: Arc<dyn FrameSink>,
    },
    /// Phone: capture frames and publish them to the relay.
    Publish {
        relay: Arc<dyn FrameRelayApi>,
        source: Arc<dyn FrameSource>,
    },
    Disabled,
}

enum FallbackStart {
    Started,
    AlreadyRunning,
    Disabled,
}

struct FallbackSlot {
    mode: Fallback,
    started: AtomicBool,
    task: Mutex<Option<TaskGuard>>,
}

impl FallbackSlot {
    fn start_once(
        &self,
        session_id: &str,
        config: &OrchestratorConfig,
        phase: Arc<watch::Sender<Phase>>,
    ) -> FallbackStart {
        if matches!(self.mode, Fallback::Disabled) {
            return FallbackStart::Disabled;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return FallbackStart::AlreadyRunning;
        }

        let device_id = session_id.to_string();
        let task = match &self.mode {
            Fallback::View { relay, sink } => {
                let (relay, sink, period) = (relay.clone(), sink.clone(), config.frame_poll);
                TaskGuard::spawn(async move {
                    if let Err(err) = run_frame_viewer(relay, device_id, period, sink).await {
                        warn!("frame viewer stopped: {}", err);
                    }
                })
            }
            Fallback::Publish { relay, source } => {
                let (relay, source, period) = (relay.clone(), source.clone(), config.frame_publish);
                TaskGuard::spawn(async move {
                    match run_frame_pump(relay, device_id, period, source).await {
                        Err(AgentError::SessionClosed) => {
                            phase.send_replace(Phase::Closed);
                        }
                        Err(AgentError::CameraUnavailable(msg)) => {
                            phase.send_replace(Phase::Failed(Failure::CameraUnavailable(msg)));
                        }
                        Err(err) => warn!("frame pump stopped: {}", err),
                        Ok(()) => {}
                    }
                })
            }
            Fallback::Disabled => return FallbackStart::Disabled,
        };
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
        FallbackStart::Started
    }

    fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    fn take(&self) -> Option<TaskGuard> {
        self.task.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Take the running loop and re-arm the slot for a later timeout.
    fn stop(&self) -> Option<TaskGuard> {
        let task = self.take();
        self.started.store(false, Ordering::SeqCst);
        task
    }
}

struct Shared {
    role: Role,
    session_id: String,
    signaling: Arc<dyn SignalingApi>,
    peers: Arc<dyn PeerFactory>,
    config: OrchestratorConfig,
    phase: Arc<watch::Sender<Phase>>,
    fallback: FallbackSlot,
    /// Last remote description applied, so a stale one left in the mailbox
    /// by an earlier attempt is not applied again.
    last_remote: Mutex<Option<SessionDescription>>,
}

impl Shared {
    fn set_phase(&self, phase: Phase) {
        debug!(role = %self.role, session_id = %self.session_id, ?phase, "phase");
        self.phase.send_replace(phase);
    }

    fn last_remote(&self) -> Option<SessionDescription> {
        self.last_remote.lock().ok().and_then(|slot| slot.clone())
    }

    fn remember_remote(&self, desc: &SessionDescription) {
        if let Ok(mut slot) = self.last_remote.lock() {
            *slot = Some(desc.clone());
        }
    }
}

type PeerSlot = Arc<Mutex<Option<Arc<dyn PeerConnection>>>>;

/// Background tasks of one attempt. Dropping it stops them.
struct AttemptTasks {
    _router: TaskGuard,
    pending_trickle: Option<mpsc::UnboundedReceiver<IceCandidate>>,
    trickler: Option<TaskGuard>,
    ice_poller: Option<TaskGuard>,
}

impl AttemptTasks {
    /// Local candidates queue up until the local description is published,
    /// so none of them lands before the offer that clears the lists.
    fn start_trickling(&mut self, shared: &Arc<Shared>) {
        if let Some(candidates) = self.pending_trickle.take() {
            self.trickler = Some(TaskGuard::spawn(trickle_local_candidates(
                shared.clone(),
                candidates,
            )));
        }
    }
}

/// How a lost attempt ends.
enum Settle {
    At(Phase),
    /// Hand over to the frame relay, or fail with this when there is none.
    Fallback(Failure),
}

/// The one in-flight negotiation.
struct Attempt {
    driver: TaskGuard,
    peer: PeerSlot,
}

impl Attempt {
    async fn cancel(self) {
        self.driver.cancel().await;
        let peer = self.peer.lock().ok().and_then(|mut slot| slot.take());
        if let Some(peer) = peer {
            if let Err(err) = peer.close().await {
                debug!("closing superseded peer failed: {}", err);
            }
        }
    }
}

pub struct Orchestrator {
    shared: Arc<Shared>,
    phase_rx: watch::Receiver<Phase>,
    attempt: Option<Attempt>,
}

impl Orchestrator {
    pub fn new(
        role: Role,
        session_id: impl Into<String>,
        signaling: Arc<dyn SignalingApi>,
        peers: Arc<dyn PeerFactory>,
        fallback: Fallback,
        config: OrchestratorConfig,
    ) -> AgentResult<Self> {
        let session_id = session_id.into();
        if !is_valid_session_id(&session_id) {
            return Err(AgentError::Validation(format!(
                "invalid session id '{session_id}'"
            )));
        }
        let (phase_tx, phase_rx) = watch::channel(Phase::Init);
        Ok(Self {
            shared: Arc::new(Shared {
                role,
                session_id,
                signaling,
                peers,
                config,
                phase: Arc::new(phase_tx),
                fallback: FallbackSlot {
                    mode: fallback,
                    started: AtomicBool::new(false),
                    task: Mutex::new(None),
                },
                last_remote: Mutex::new(None),
            }),
            phase_rx,
            attempt: None,
        })
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn phase(&self) -> Phase {
        self.phase_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_rx.clone()
    }

    pub fn fallback_active(&self) -> bool {
        self.shared.fallback.is_running()
    }

    /// Resolve once the phase satisfies `pred`.
    pub async fn wait_for(&self, mut pred: impl FnMut(&Phase) -> bool) -> Phase {
        let mut rx = self.phase_rx.clone();
        let result = rx.wait_for(|phase| pred(phase)).await.map(|phase| phase.clone());
        result.unwrap_or_else(|_| self.phase())
    }

    /// Begin negotiating. Any earlier attempt is torn down first.
    pub async fn start(&mut self) {
        if let Some(previous) = self.attempt.take() {
            info!(session_id = %self.shared.session_id, "cancelling previous negotiation");
            previous.cancel().await;
        }
        self.shared.set_phase(Phase::Init);

        let peer: PeerSlot = Arc::new(Mutex::new(None));
        let driver = TaskGuard::spawn(drive(self.shared.clone(), peer.clone()));
        self.attempt = Some(Attempt { driver, peer });
    }

    pub async fn renegotiate(&mut self) {
        self.start().await;
    }

    /// Stop negotiation and any fallback loop.
    pub async fn shutdown(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.cancel().await;
        }
        if let Some(task) = self.shared.fallback.take() {
            task.cancel().await;
        }
        self.shared.set_phase(Phase::Closed);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        drop(self.shared.fallback.take());
    }
}

async fn drive(shared: Arc<Shared>, peer_slot: PeerSlot) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let peer = match shared.peers.create(shared.role, events_tx).await {
        Ok(peer) => peer,
        Err(AgentError::CameraUnavailable(msg)) => {
            warn!("camera unavailable: {}", msg);
            shared.set_phase(Phase::Failed(Failure::CameraUnavailable(msg)));
            return;
        }
        Err(err) => {
            warn!("could not create peer connection: {}", err);
            enter_fallback(&shared, Failure::Peer(err.to_string()));
            return;
        }
    };
    if let Ok(mut slot) = peer_slot.lock() {
        *slot = Some(peer.clone());
    }

    let (state_tx, state_rx) = watch::channel(PeerState::New);
    let (trickle_tx, trickle_rx) = mpsc::unbounded_channel();
    let mut tasks = AttemptTasks {
        _router: TaskGuard::spawn(route_events(events_rx, trickle_tx, state_tx)),
        pending_trickle: Some(trickle_rx),
        trickler: None,
        ice_poller: None,
    };

    let negotiation = negotiate(&shared, &peer, &mut tasks, state_rx.clone());
    let outcome = tokio::time::timeout(shared.config.negotiation_timeout, negotiation)
        .await
        .unwrap_or(Err(AgentError::NegotiationTimeout));
    drop(tasks.ice_poller.take());

    let settle = match outcome {
        Ok(()) => {
            if let Some(relay) = shared.fallback.stop() {
                info!(session_id = %shared.session_id, "stopping frame relay");
                relay.cancel().await;
            }
            info!(role = %shared.role, session_id = %shared.session_id, "peer connection live");
            shared.set_phase(Phase::StreamReceived);

            tokio::time::sleep(shared.config.trickle_grace).await;
            drop(tasks.trickler.take());
            watch_connection(state_rx).await;
            return;
        }
        Err(AgentError::SessionClosed) => {
            info!(session_id = %shared.session_id, "session closed during negotiation");
            Settle::At(Phase::Closed)
        }
        Err(AgentError::Validation(msg)) => {
            warn!("gateway rejected negotiation: {}", msg);
            Settle::At(Phase::Failed(Failure::InvalidSession(msg)))
        }
        Err(AgentError::CameraUnavailable(msg)) => {
            Settle::At(Phase::Failed(Failure::CameraUnavailable(msg)))
        }
        Err(AgentError::NegotiationTimeout) => {
            info!(
                session_id = %shared.session_id,
                "{} after {:?}",
                AgentError::NegotiationTimeout,
                shared.config.negotiation_timeout
            );
            Settle::Fallback(Failure::Timeout)
        }
        Err(err) => {
            warn!("negotiation failed: {}", err);
            Settle::Fallback(Failure::Peer(err.to_string()))
        }
    };

    // The losing negotiation is torn down before anything else starts.
    drop(tasks);
    let peer = peer_slot.lock().ok().and_then(|mut slot| slot.take());
    if let Some(peer) = peer {
        if let Err(err) = peer.close().await {
            debug!("closing peer failed: {}", err);
        }
    }

    match settle {
        Settle::At(phase) => shared.set_phase(phase),
        Settle::Fallback(failure) => enter_fallback(&shared, failure),
    }
}

fn enter_fallback(shared: &Shared, failure: Failure) {
    shared.set_phase(Phase::TimedOut);
    match shared
        .fallback
        .start_once(&shared.session_id, &shared.config, shared.phase.clone())
    {
        FallbackStart::Started => {
            info!(session_id = %shared.session_id, "falling back to frame relay");
            shared.set_phase(Phase::FramePolling);
        }
        FallbackStart::AlreadyRunning => shared.set_phase(Phase::FramePolling),
        FallbackStart::Disabled => shared.set_phase(Phase::Failed(failure)),
    }
}

async fn negotiate(
    shared: &Arc<Shared>,
    peer: &Arc<dyn PeerConnection>,
    tasks: &mut AttemptTasks,
    mut state: watch::Receiver<PeerState>,
) -> AgentResult<()> {
    let sid = shared.session_id.as_str();
    let signaling = shared.signaling.as_ref();

    if shared.role.is_offerer() {
        shared.set_phase(Phase::CreatingOffer);
        // An answer left over from an earlier offer must not be applied to this one.
        let stale = match signaling.fetch_answer(sid).await {
            Ok(answer) => answer,
            Err(err) if err.is_retryable() => shared.last_remote(),
            Err(err) => return Err(err),
        };
        let offer = peer.create_offer().await?;
        signaling.publish_offer(sid, &offer).await?;
        tasks.start_trickling(shared);
        info!(session_id = sid, "offer published");

        shared.set_phase(Phase::AwaitingAnswer);
        let stale = stale.as_ref();
        let answer = poll_until(shared.config.answer_poll, || async move {
            let answer = signaling.fetch_answer(sid).await?;
            Ok(answer.filter(|a| Some(a) != stale))
        })
        .await?;
        peer.apply_answer(&answer).await?;
        shared.remember_remote(&answer);
        debug!(session_id = sid, "answer applied");
    } else {
        shared.set_phase(Phase::AwaitingOffer);
        let stale = shared.last_remote();
        let stale = stale.as_ref();
        let offer = poll_until(shared.config.offer_poll, || async move {
            let offer = signaling.fetch_offer(sid).await?;
            Ok(offer.filter(|o| Some(o) != stale))
        })
        .await?;

        shared.set_phase(Phase::Answering);
        let answer = peer.accept_offer(&offer).await?;
        shared.remember_remote(&offer);
        signaling.publish_answer(sid, &answer).await?;
        tasks.start_trickling(shared);
        info!(session_id = sid, "answer published");
    }

    shared.set_phase(Phase::ExchangingIce);
    tasks.ice_poller = Some(TaskGuard::spawn(poll_remote_candidates(
        shared.clone(),
        peer.clone(),
    )));
    wait_connected(&mut state).await
}

/// Poll `fetch` on a fixed cadence until it yields a value. Retryable
/// errors are swallowed until the next tick.
async fn poll_until<T, F, Fut>(period: Duration, mut fetch: F) -> AgentResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AgentResult<Option<T>>>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match fetch().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) if err.is_retryable() => debug!("poll failed, retrying: {}", err),
            Err(err) => return Err(err),
        }
    }
}

async fn wait_connected(state: &mut watch::Receiver<PeerState>) -> AgentResult<()> {
    loop {
        let current = *state.borrow_and_update();
        match current {
            PeerState::Connected => return Ok(()),
            PeerState::Failed | PeerState::Closed => {
                return Err(AgentError::Peer(format!("peer connection {current:?}")))
            }
            _ => {}
        }
        if state.changed().await.is_err() {
            return Err(AgentError::Peer("peer event stream ended".to_string()));
        }
    }
}

async fn watch_connection(mut state: watch::Receiver<PeerState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        if matches!(current, PeerState::Disconnected | PeerState::Failed) {
            warn!("live peer connection is now {:?}", current);
        }
    }
}

async fn route_events(
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    trickle: mpsc::UnboundedSender<IceCandidate>,
    state: watch::Sender<PeerState>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                // Closed once the trickle grace period is over.
                let _ = trickle.send(candidate);
            }
            PeerEvent::StateChanged(next) => {
                state.send_replace(next);
            }
        }
    }
}

async fn trickle_local_candidates(
    shared: Arc<Shared>,
    mut candidates: mpsc::UnboundedReceiver<IceCandidate>,
) {
    while let Some(candidate) = candidates.recv().await {
        if let Err(err) = shared
            .signaling
            .push_candidate(&shared.session_id, shared.role, &candidate)
            .await
        {
            warn!("failed to publish local candidate: {}", err);
        }
    }
}

/// Apply every remote candidate not seen before, in publication order.
async fn poll_remote_candidates(shared: Arc<Shared>, peer: Arc<dyn PeerConnection>) {
    let remote = shared.role.peer();
    let mut seen: HashSet<IceCandidate> = HashSet::new();
    let mut ticker = interval(shared.config.ice_poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let candidates = match shared
            .signaling
            .fetch_candidates(&shared.session_id, remote)
            .await
        {
            Ok(candidates) => candidates,
            Err(err) if err.is_retryable() => {
                debug!("candidate poll failed, retrying: {}", err);
                continue;
            }
            Err(err) => {
                warn!("candidate polling stopped: {}", err);
                return;
            }
        };
        for candidate in candidates {
            if !seen.insert(candidate.clone()) {
                continue;
            }
            if let Err(err) = peer.add_ice_candidate(&candidate).await {
                warn!("failed to apply remote candidate: {}", err);
            }
        }
    }
}
