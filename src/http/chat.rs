//! `POST /v1/chat/completions`.

use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::RelayError;
use crate::http::request::request_id;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::relay::ChatRequest;

/// Relay a chat completion to the backend, buffered or streamed.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let start = Instant::now();
    let request_id = request_id(&headers);

    let response = match payload {
        Ok(Json(request)) => match state.relay().handle(request, &request_id).await {
            Ok(reply) => reply.into_response(),
            Err(e) => e.into_response(),
        },
        Err(rejection) => {
            tracing::warn!(request_id = %request_id, error = %rejection.body_text(), "Rejected chat request");
            RelayError::from(rejection).into_response()
        }
    };

    metrics::record_request("chat", response.status().as_u16(), start);
    response
}
