//! HTTP client for the checkout gateway.

use std::time::Duration;

use async_trait::async_trait;
use checkout_common::{
    AnswerRequest, AnswerResponse, BarcodeRequest, BarcodeResponse, ConnectRequest,
    ConnectResponse, DetectionResult, ErrorResponse, FrameRequest, FrameResponse, IceCandidate,
    IceRequest, IceResponse, NewSessionResponse, OfferRequest, OfferResponse, OkResponse, Product,
    ProductResponse, Role, SessionDescription, SessionStatus,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{AgentError, AgentResult};
use crate::signaling::{FrameRelayApi, SignalingApi};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

async fn error_message(resp: Response) -> String {
    let status = resp.status();
    match resp.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    }
}

/// Map a non-success status onto the agent error taxonomy.
fn status_error(status: StatusCode, message: String) -> AgentError {
    match status {
        StatusCode::BAD_REQUEST => AgentError::Validation(message),
        StatusCode::GONE => AgentError::SessionClosed,
        StatusCode::SERVICE_UNAVAILABLE => AgentError::Storage(message),
        // Rereading a corrupt entry returns the same 500 until it expires.
        StatusCode::INTERNAL_SERVER_ERROR => AgentError::Corrupt(message),
        _ => AgentError::Transport(format!("{status}: {message}")),
    }
}

async fn into_error(resp: Response) -> AgentError {
    let status = resp.status();
    let message = error_message(resp).await;
    status_error(status, message)
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> AgentResult<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AgentResult<T> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// GET that treats 404 as "nothing there yet".
    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AgentResult<Option<T>> {
        let resp = self.http.get(self.url(path)).query(query).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(path, "nothing published yet");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        Ok(Some(resp.json().await?))
    }

    async fn get_required<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AgentResult<T> {
        let resp = self.http.get(self.url(path)).query(query).send().await?;
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    pub async fn new_session(&self) -> AgentResult<NewSessionResponse> {
        let resp = self.http.post(self.url("/session")).send().await?;
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    pub async fn connect(&self, device_id: &str, phone_id: &str) -> AgentResult<ConnectResponse> {
        let req = ConnectRequest {
            device_id: device_id.to_string(),
            phone_id: phone_id.to_string(),
        };
        self.post_json("/session/connect", &req).await
    }

    pub async fn status(&self, session_id: &str) -> AgentResult<SessionStatus> {
        self.get_required("/session/status", &[("sessionId", session_id)])
            .await
    }

    pub async fn teardown(&self, session_id: &str) -> AgentResult<()> {
        let resp = self
            .http
            .delete(self.url("/session"))
            .query(&[("sessionId", session_id)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        Ok(())
    }

    pub async fn lookup_product(&self, barcode: &str) -> AgentResult<Product> {
        let found: Option<ProductResponse> = self
            .get_optional("/products", &[("barcode", barcode)])
            .await?;
        found
            .map(|resp| resp.product)
            .ok_or_else(|| AgentError::Catalog(format!("no product with barcode {barcode}")))
    }

    pub async fn detect(&self, image: Vec<u8>, content_type: &str) -> AgentResult<DetectionResult> {
        let resp = self
            .http
            .post(self.url("/detect"))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(image)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(into_error(resp).await);
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl SignalingApi for GatewayClient {
    async fn publish_offer(&self, session_id: &str, offer: &SessionDescription) -> AgentResult<()> {
        let req = OfferRequest {
            session_id: session_id.to_string(),
            offer: Some(offer.clone()),
        };
        let _: OkResponse = self.post_json("/signal/offer", &req).await?;
        Ok(())
    }

    async fn fetch_offer(&self, session_id: &str) -> AgentResult<Option<SessionDescription>> {
        let resp: Option<OfferResponse> = self
            .get_optional("/signal/offer", &[("sessionId", session_id)])
            .await?;
        Ok(resp.map(|r| r.offer))
    }

    async fn publish_answer(
        &self,
        session_id: &str,
        answer: &SessionDescription,
    ) -> AgentResult<()> {
        let req = AnswerRequest {
            session_id: session_id.to_string(),
            answer: Some(answer.clone()),
        };
        let _: OkResponse = self.post_json("/signal/answer", &req).await?;
        Ok(())
    }

    async fn fetch_answer(&self, session_id: &str) -> AgentResult<Option<SessionDescription>> {
        let resp: Option<AnswerResponse> = self
            .get_optional("/signal/answer", &[("sessionId", session_id)])
            .await?;
        Ok(resp.map(|r| r.answer))
    }

    async fn push_candidate(
        &self,
        session_id: &str,
        role: Role,
        candidate: &IceCandidate,
    ) -> AgentResult<()> {
        let req = IceRequest {
            session_id: session_id.to_string(),
            role: Some(role),
            candidate: Some(candidate.clone()),
        };
        let _: OkResponse = self.post_json("/signal/ice", &req).await?;
        Ok(())
    }

    async fn fetch_candidates(
        &self,
        session_id: &str,
        role: Role,
    ) -> AgentResult<Vec<IceCandidate>> {
        let resp: IceResponse = self
            .get_required(
                "/signal/ice",
                &[("sessionId", session_id), ("role", role.as_str())],
            )
            .await?;
        Ok(resp.candidates)
    }
}

#[async_trait]
impl FrameRelayApi for GatewayClient {
    async fn publish_barcode(&self, device_id: &str, barcode: &str) -> AgentResult<()> {
        let req = BarcodeRequest {
            device_id: device_id.to_string(),
            barcode: barcode.to_string(),
        };
        let _: OkResponse = self.post_json("/relay/barcode", &req).await?;
        Ok(())
    }

    async fn consume_barcode(&self, device_id: &str) -> AgentResult<Option<String>> {
        let resp: Option<BarcodeResponse> = self
            .get_optional("/relay/barcode", &[("deviceId", device_id)])
            .await?;
        Ok(resp.map(|r| r.barcode))
    }

    async fn publish_frame(&self, device_id: &str, image_data: &str) -> AgentResult<()> {
        let req = FrameRequest {
            device_id: device_id.to_string(),
            image_data: image_data.to_string(),
        };
        let _: OkResponse = self.post_json("/relay/frame", &req).await?;
        Ok(())
    }

    async fn fetch_frame(&self, device_id: &str) -> AgentResult<Option<String>> {
        let resp: Option<FrameResponse> = self
            .get_optional("/relay/frame", &[("deviceId", device_id)])
            .await?;
        Ok(resp.map(|r| r.image_data))
    }
}
