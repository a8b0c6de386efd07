//! HTTP handlers

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatcast_core::chat::HistorySnapshot;
use chatcast_core::health::HealthReport;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::socket;
use crate::state::AppState;

/// GET /ws - upgrade to the chat socket
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> ApiResult<Response> {
    let identity = identity_from(&headers, &state.config.identity_header);
    if identity.is_none() && state.config.require_identity {
        return Err(ApiError::Unauthorized(state.config.identity_header.clone()));
    }
    let ws = ws.ok_or(ApiError::UpgradeRequired)?;

    let guard = state.try_reserve_connection().ok_or(ApiError::TooManyConnections)?;
    if state.dispatcher.is_closed() {
        return Err(ApiError::DispatcherUnavailable);
    }

    let max_frame = state.config.max_frame_bytes;
    Ok(ws
        .max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| socket::handle_connection(socket, state, identity, guard)))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state
        .health
        .check(state.store.as_ref(), &state.dispatcher, &state.metrics)
        .await;
    let status =
        StatusCode::from_u16(report.status.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(report))
}

/// GET /api/messages - the current history, oldest first
pub async fn list_messages(State(state): State<AppState>) -> ApiResult<Json<HistorySnapshot>> {
    let history = state.store.list_all().await?;
    debug!(messages = history.len(), "Serving history");
    Ok(Json(history))
}

pub async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

/// Blank header values count as absent
fn identity_from(headers: &HeaderMap, header: &str) -> Option<String> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_from_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(identity_from(&headers, "x-chat-user"), None);

        headers.insert("x-chat-user", HeaderValue::from_static("  "));
        assert_eq!(identity_from(&headers, "x-chat-user"), None);

        headers.insert("x-chat-user", HeaderValue::from_static(" alice "));
        assert_eq!(identity_from(&headers, "x-chat-user"), Some("alice".to_string()));
    }
}
