use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatcast_core::chat::PersistenceError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing identity header '{0}'")]
    Unauthorized(String),

    #[error("expected a WebSocket upgrade request")]
    UpgradeRequired,

    #[error("connection limit reached")]
    TooManyConnections,

    #[error("store error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("chat dispatcher is not running")]
    DispatcherUnavailable,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            ApiError::TooManyConnections | ApiError::DispatcherUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Persistence(PersistenceError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Unauthorized("x-chat-user".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(PersistenceError::Timeout(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(PersistenceError::Unavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
