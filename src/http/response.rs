//! Response construction.
//!
//! # Responsibilities
//! - Map relay errors to status codes and `{error, details}` bodies
//! - Turn relay replies into JSON or event-stream responses
//!
//! # Design Decisions
//! - Streaming responses avoid buffering: each event is its own body chunk
//! - Intermediaries are told not to buffer (`x-accel-buffering: no`)
//! - Backend statuses are passed through unchanged in buffered mode

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::RelayError;
use crate::relay::{EventStream, RelayReply};
use crate::state::UploadError;

/// Structured error payload.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub details: String,
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::BackendUnreachable(_) | RelayError::BackendRejected { .. } => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::InvalidBackendJson(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::RejectedBody { status, .. } => *status,
            RelayError::Upload(e) => match e {
                UploadError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                UploadError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.kind(),
            details: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for RelayReply {
    fn into_response(self) -> Response {
        match self {
            RelayReply::Json { status, body } => (status, Json(body)).into_response(),
            RelayReply::Stream(events) => stream_response(events),
        }
    }
}

/// Build a `text/event-stream` response that forwards events as they arrive.
pub fn stream_response(events: EventStream) -> Response {
    let mut response = Response::new(Body::from_stream(events.into_body_stream()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
