use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Json, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use checkout_common::helpers::decode_data_url;
use checkout_common::{
    AnswerRequest, AnswerResponse, BarcodeRequest, BarcodeResponse, ConnectRequest, ConnectResponse,
    DetectionResult, FrameRequest, FrameResponse, IceRequest, IceResponse, NewSessionResponse,
    OfferRequest, OfferResponse, OkResponse, ProductResponse, ProductsResponse, Role,
    SessionStatus,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    #[serde(default, alias = "deviceId")]
    pub session_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQuery {
    #[serde(default, alias = "sessionId")]
    pub device_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceQuery {
    #[serde(default, alias = "deviceId")]
    pub session_id: String,
    #[serde(default, alias = "type")]
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub barcode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub products: usize,
    pub uptime_secs: u64,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn parse_role(raw: Option<&str>) -> Result<Role, ApiError> {
    let raw = raw
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("role is required".to_string()))?;
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid role '{raw}'")))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        store: state.store.backend_name(),
        products: state.catalog.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

// Signaling

pub async fn post_offer(
    State(state): State<AppState>,
    payload: Result<Json<OfferRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let req = body(payload)?;
    let offer = req
        .offer
        .ok_or_else(|| ApiError::BadRequest("offer is required".to_string()))?;
    state.signaling.publish_offer(&req.session_id, &offer).await?;
    Ok(Json(OkResponse::OK))
}

pub async fn get_offer(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<OfferResponse> {
    match state.signaling.fetch_offer(&query.session_id).await? {
        Some(offer) => Ok(Json(OfferResponse { offer })),
        None => Err(ApiError::not_found("No offer found")),
    }
}

pub async fn post_answer(
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let req = body(payload)?;
    let answer = req
        .answer
        .ok_or_else(|| ApiError::BadRequest("answer is required".to_string()))?;
    state.signaling.publish_answer(&req.session_id, &answer).await?;
    Ok(Json(OkResponse::OK))
}

pub async fn get_answer(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<AnswerResponse> {
    match state.signaling.fetch_answer(&query.session_id).await? {
        Some(answer) => Ok(Json(AnswerResponse { answer })),
        None => Err(ApiError::not_found("No answer found")),
    }
}

pub async fn post_ice(
    State(state): State<AppState>,
    payload: Result<Json<IceRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let req = body(payload)?;
    let role = req
        .role
        .ok_or_else(|| ApiError::BadRequest("role is required".to_string()))?;
    let candidate = req
        .candidate
        .ok_or_else(|| ApiError::BadRequest("candidate is required".to_string()))?;
    state
        .signaling
        .push_ice_candidate(&req.session_id, role, &candidate)
        .await?;
    Ok(Json(OkResponse::OK))
}

pub async fn get_ice(
    State(state): State<AppState>,
    Query(query): Query<IceQuery>,
) -> ApiResult<IceResponse> {
    let role = parse_role(query.role.as_deref())?;
    let candidates = state
        .signaling
        .fetch_ice_candidates(&query.session_id, role)
        .await?;
    Ok(Json(IceResponse { candidates }))
}

// Frame relay

pub async fn post_barcode(
    State(state): State<AppState>,
    payload: Result<Json<BarcodeRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let req = body(payload)?;
    state.frames.publish_barcode(&req.device_id, &req.barcode).await?;
    Ok(Json(OkResponse::OK))
}

pub async fn get_barcode(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> ApiResult<BarcodeResponse> {
    match state.frames.consume_barcode(&query.device_id).await? {
        Some(barcode) => Ok(Json(BarcodeResponse { barcode })),
        None => Err(ApiError::not_found("No barcode")),
    }
}

pub async fn post_frame(
    State(state): State<AppState>,
    payload: Result<Json<FrameRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let req = body(payload)?;
    state.frames.publish_frame(&req.device_id, &req.image_data).await?;
    Ok(Json(OkResponse::OK))
}

pub async fn get_frame(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> ApiResult<FrameResponse> {
    match state.frames.fetch_frame(&query.device_id).await? {
        Some(image_data) => Ok(Json(FrameResponse { image_data })),
        None => Err(ApiError::not_found("No frame")),
    }
}

// Sessions

pub async fn create_session(State(state): State<AppState>) -> ApiResult<NewSessionResponse> {
    Ok(Json(state.sessions.create()?))
}

pub async fn connect_session(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> ApiResult<ConnectResponse> {
    let req = body(payload)?;
    Ok(Json(state.sessions.connect(&req.device_id, &req.phone_id).await?))
}

pub async fn session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<SessionStatus> {
    let mut status = state.sessions.status(&query.session_id).await?;
    status.signaling = state.signaling.phase(&query.session_id).await?;
    Ok(Json(status))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<OkResponse> {
    state.sessions.teardown(&query.session_id).await?;
    Ok(Json(OkResponse::OK))
}

// Catalog and detection

pub async fn products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<axum::response::Response, ApiError> {
    match query.barcode.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        Some(barcode) => {
            let product = state
                .catalog
                .lookup(barcode)
                .map_err(|_| ApiError::not_found("Product not found"))?
                .clone();
            Ok(Json(ProductResponse { product }).into_response())
        }
        None => Ok(Json(ProductsResponse {
            products: state.catalog.products().to_vec(),
        })
        .into_response()),
    }
}

/// Accepts either a raw image body (`Content-Type: image/*`) or a JSON
/// `{ imageData }` holding a base64 data URL.
pub async fn detect(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<DetectionResult> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase())
        .unwrap_or_default();

    let (image, mime) = if content_type == "application/json" {
        let req: FrameRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
        decode_data_url(&req.image_data)
            .map(|(mime, bytes)| (Bytes::from(bytes), mime))
            .ok_or_else(|| ApiError::BadRequest("imageData must be a base64 image data URL".to_string()))?
    } else {
        let mime = if content_type.starts_with("image/") {
            content_type
        } else {
            "image/jpeg".to_string()
        };
        (body, mime)
    };

    if image.is_empty() {
        return Err(ApiError::BadRequest("image is required".to_string()));
    }

    let result = state
        .detector
        .detect(image, &mime)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    Ok(Json(result))
}
