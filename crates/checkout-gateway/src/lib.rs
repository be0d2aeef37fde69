//! Checkout gateway: mailbox store, WebRTC signaling relay, frame relay and
//! the HTTP surface kiosk and phone agents poll.

pub mod config;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod relay;
pub mod security;
pub mod session;
pub mod signal;
pub mod store;
pub mod web;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Request, State},
    http::{header, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use checkout_common::{Catalog, MAX_FRAME_BYTES};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{GatewayConfig, StoreBackend, TtlConfig};
pub use detector::DetectorClient;
pub use error::{ApiError, RelayError};
pub use metrics::RelayMetrics;
pub use relay::FrameRelay;
pub use security::FixedWindowRateLimiter;
pub use session::SessionService;
pub use signal::SignalingRelay;
pub use store::{MailboxStore, MemoryStore, SharedStore, SqliteStore, StoreError};

/// JSON envelope overhead allowed on top of the largest frame payload.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub signaling: Arc<SignalingRelay>,
    pub frames: Arc<FrameRelay>,
    pub sessions: Arc<SessionService>,
    pub catalog: Arc<Catalog>,
    pub detector: Arc<DetectorClient>,
    pub metrics: Arc<RelayMetrics>,
    pub limiter: Arc<FixedWindowRateLimiter>,
    pub trust_forwarded_for: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &GatewayConfig, store: SharedStore, catalog: Catalog) -> anyhow::Result<Self> {
        let metrics = Arc::new(RelayMetrics::default());
        let detector = DetectorClient::new(config.detector_url.clone(), config.detector_timeout)?;
        Ok(Self {
            signaling: Arc::new(SignalingRelay::new(store.clone(), config.ttl, metrics.clone())),
            frames: Arc::new(FrameRelay::new(store.clone(), config.ttl, metrics.clone())),
            sessions: Arc::new(SessionService::new(
                store.clone(),
                config.public_base_url.clone(),
                config.ttl,
                metrics.clone(),
            )),
            store,
            catalog: Arc::new(catalog),
            detector: Arc::new(detector),
            metrics,
            limiter: Arc::new(FixedWindowRateLimiter::new(
                config.rate_limit,
                config.rate_window,
                config.rate_max_keys,
            )),
            trust_forwarded_for: config.trust_forwarded_for,
            started_at: Instant::now(),
        })
    }
}

/// Open the configured mailbox backend.
pub async fn connect_store(config: &GatewayConfig) -> Result<SharedStore, StoreError> {
    match &config.store {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory mailbox store; sessions are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite(url) => {
            let store = SqliteStore::connect(url, config.store_op_timeout).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Periodically drop expired mailboxes so abandoned sessions do not pile up.
pub fn spawn_purge_task(store: SharedStore, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(count) if count > 0 => tracing::info!("purged {} expired mailboxes", count),
                Ok(_) => {}
                Err(err) => tracing::warn!("failed to purge expired mailboxes: {}", err),
            }
        }
    })
}

async fn api_rate_limit(State(state): State<AppState>, req: Request, next: middleware::Next) -> Response {
    let path = req.uri().path();
    if path == "/" || path == "/health" || path.starts_with("/metrics/") {
        return next.run(req).await;
    }

    let direct_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    let client_ip =
        security::effective_client_ip(req.headers(), direct_addr, state.trust_forwarded_for);
    let key = format!("{}:{}:{}", req.method(), path, client_ip);
    if !state.limiter.allow(&key) {
        metrics::incr(&state.metrics.rate_limited);
        return ApiError::RateLimited.into_response();
    }

    next.run(req).await
}

fn build_cors_layer(config: &GatewayConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let layer = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE]);

    if config.cors_allow_any {
        return layer.allow_origin(AllowOrigin::any());
    }
    let origins = security::cors_origin_values(&config.cors_origins);
    if origins.is_empty() {
        tracing::warn!("no valid CORS origins configured; cross-origin browser access will be blocked");
        return layer;
    }
    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn router(state: AppState, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/", get(|| async { "Checkout Gateway Online" }))
        .route("/health", get(web::health))
        .route("/metrics/prometheus", get(web::prometheus_metrics))
        .route("/session", post(web::create_session).delete(web::delete_session))
        .route("/session/connect", post(web::connect_session))
        .route("/session/status", get(web::session_status))
        .route("/signal/offer", post(web::post_offer).get(web::get_offer))
        .route("/signal/answer", post(web::post_answer).get(web::get_answer))
        .route("/signal/ice", post(web::post_ice).get(web::get_ice))
        .route("/relay/barcode", post(web::post_barcode).get(web::get_barcode))
        .route("/relay/frame", post(web::post_frame).get(web::get_frame))
        .route("/products", get(web::products))
        .route("/detect", post(web::detect))
        .layer(DefaultBodyLimit::max(MAX_FRAME_BYTES + BODY_LIMIT_SLACK))
        .layer(middleware::from_fn_with_state(state.clone(), api_rate_limit))
        .layer(build_cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
