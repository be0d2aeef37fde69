//! JSON shapes exchanged between agents and the gateway.
//!
//! Field names follow the browser conventions (`sessionId`, `imageData`,
//! `sdpMLineIndex`) so a page can post `RTCSessionDescriptionInit` and
//! `RTCIceCandidateInit` objects unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::Product;

pub const MAX_SESSION_ID_BYTES: usize = 128;
pub const MAX_SDP_BYTES: usize = 32 * 1024;
pub const MAX_CANDIDATE_BYTES: usize = 4096;
pub const MAX_BARCODE_BYTES: usize = 128;
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Which agent produced an ICE candidate.
///
/// The kiosk page is `web` and always offers; the phone always answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Web,
    Phone,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Web => "web",
            Role::Phone => "phone",
        }
    }

    /// The role on the other end of the session.
    pub fn peer(self) -> Role {
        match self {
            Role::Web => Role::Phone,
            Role::Phone => Role::Web,
        }
    }

    /// Only the kiosk creates offers.
    pub fn is_offerer(self) -> bool {
        self == Role::Web
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" | "kiosk" => Ok(Role::Web),
            "phone" => Ok(Role::Phone),
            other => Err(crate::Error::validation(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Mirror of the browser's `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Mirror of the browser's `RTCIceCandidateInit`.
///
/// Equality covers every field, so a candidate re-fetched from the relay
/// compares equal to the one already applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

// Request bodies keep their fields optional so the gateway can answer a
// missing field with a 400 and a readable message instead of a generic
// extractor rejection.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    #[serde(default, alias = "deviceId")]
    pub session_id: String,
    #[serde(default)]
    pub offer: Option<SessionDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    #[serde(default, alias = "deviceId")]
    pub session_id: String,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceRequest {
    #[serde(default, alias = "deviceId")]
    pub session_id: String,
    #[serde(default, alias = "type")]
    pub role: Option<Role>,
    #[serde(default)]
    pub candidate: Option<IceCandidate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IceResponse {
    pub candidates: Vec<IceCandidate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeRequest {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub barcode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarcodeResponse {
    pub barcode: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRequest {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub image_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResponse {
    pub image_data: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub const OK: OkResponse = OkResponse { ok: true };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Returned when the kiosk opens a checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    pub session_id: String,
    pub join_url: String,
    pub qr_svg: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub phone_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub ok: bool,
    pub device_id: String,
    pub phone_id: String,
}

/// Server-side view of a session's signaling progress.
///
/// There is no `Connected` phase: only the agents can observe that their
/// peer connection went live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalingPhase {
    #[default]
    Idle,
    OfferPublished,
    AnswerPublished,
    IceExchanging,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phone_joined: bool,
    pub closed: bool,
    pub signaling: SignalingPhase,
}

/// One object reported by the external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub bbox: [f32; 4],
}

/// Detector response; only `count` drives reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub count: u32,
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResponse {
    pub product: Product,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductsResponse {
    pub products: Vec<Product>,
}
