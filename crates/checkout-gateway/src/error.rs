use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use checkout_common::ErrorResponse;
use thiserror::Error;

use crate::store::StoreError;

/// Failures of the relay operations themselves.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("session '{0}' has been closed")]
    SessionClosed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }
}

/// Everything a handler can answer with besides success.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("detector failed: {0}")]
    Upstream(String),

    #[error("too many requests")]
    RateLimited,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Relay(RelayError::Store(err))
    }
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            RelayError::Validation(msg) => error_response(StatusCode::BAD_REQUEST, msg),
            RelayError::SessionClosed(_) => error_response(StatusCode::GONE, self.to_string()),
            RelayError::Store(err) if err.is_retryable() => {
                tracing::warn!("store unavailable: {}", err);
                error_response(StatusCode::SERVICE_UNAVAILABLE, "Mailbox store unavailable")
            }
            RelayError::Store(err) => {
                tracing::error!("store failure: {}", err);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Mailbox store failure")
            }
            RelayError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Relay(err) => err.into_response(),
            ApiError::NotFound(msg) => error_response(StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => error_response(StatusCode::BAD_REQUEST, msg),
            ApiError::Upstream(msg) => {
                tracing::warn!("detector upstream failure: {}", msg);
                error_response(StatusCode::BAD_GATEWAY, "Object detector unavailable")
            }
            ApiError::RateLimited => {
                error_response(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(RelayError::validation("bad")), StatusCode::BAD_REQUEST),
            (
                ApiError::from(RelayError::SessionClosed("device_1".into())),
                StatusCode::GONE,
            ),
            (
                ApiError::from(StoreError::Timeout(Duration::from_secs(1))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::from(StoreError::Corrupt {
                    key: "offer:x".into(),
                    reason: "bad json".into(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::not_found("No offer"), StatusCode::NOT_FOUND),
            (ApiError::Upstream("refused".into()), StatusCode::BAD_GATEWAY),
            (ApiError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
