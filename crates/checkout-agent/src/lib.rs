//! Kiosk and phone agents for the checkout relay.
//!
//! The [`Orchestrator`] negotiates a peer connection through the gateway's
//! signaling mailboxes and falls back to the frame relay when that does
//! not finish in time. The pollers in [`poller`] carry barcodes and frames,
//! and [`Cart`] reconciles scans against the detected object count.

#![forbid(unsafe_code)]

pub mod cart;
pub mod client;
pub mod config;
pub mod error;
pub mod frames;
pub mod orchestrator;
pub mod peer;
pub mod poller;
pub mod signaling;
#[cfg(feature = "webrtc-peer")]
pub mod webrtc_peer;

#[cfg(test)]
mod testing;

pub use cart::{Cart, CartLine, CheckoutGate, Reconciliation};
pub use client::GatewayClient;
pub use config::OrchestratorConfig;
pub use error::{AgentError, AgentResult};
pub use orchestrator::{Failure, Fallback, Orchestrator, Phase};
pub use peer::{PeerConnection, PeerEvent, PeerEvents, PeerFactory, PeerState, RelayOnlyPeers};
pub use poller::{
    run_barcode_poller, run_frame_pump, run_frame_viewer, FrameSink, FrameSource, TaskGuard,
};
pub use signaling::{FrameRelayApi, SignalingApi};
#[cfg(feature = "webrtc-peer")]
pub use webrtc_peer::WebRtcPeerFactory;
