//! Error taxonomy for the relay.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use thiserror::Error;

use crate::state::documents::UploadError;

/// Errors surfaced by relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The backend could not be reached or the connection broke before a response arrived.
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(#[source] reqwest::Error),

    /// A configured backend timeout elapsed.
    #[error("Backend timed out: {0}")]
    BackendTimeout(#[source] reqwest::Error),

    /// The backend answered an auxiliary call (model listing, warmup) with a non-2xx status.
    #[error("Backend returned {status}: {body}")]
    BackendRejected { status: u16, body: String },

    /// The backend answered with a body that is not JSON.
    #[error("Backend returned invalid JSON: {0}")]
    InvalidBackendJson(#[source] serde_json::Error),

    /// The client's request could not be dispatched as sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request body was refused before it was parsed (too large, wrong media type).
    #[error("Request body rejected: {details}")]
    RejectedBody { status: StatusCode, details: String },

    /// Document upload failed.
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl RelayError {
    /// Classify a transport error from the backend client.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::BackendTimeout(err)
        } else {
            RelayError::BackendUnreachable(err)
        }
    }

    /// Stable machine-readable kind, used as the `error` field of responses and as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::BackendUnreachable(_) => "backend_unreachable",
            RelayError::BackendTimeout(_) => "backend_timeout",
            RelayError::BackendRejected { .. } => "backend_error",
            RelayError::InvalidBackendJson(_) => "invalid_backend_response",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::RejectedBody { status, .. } => match *status {
                StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
                StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_media_type",
                _ => "invalid_request",
            },
            RelayError::Upload(e) => e.kind(),
        }
    }
}

/// Body-level rejections keep their status; anything that reached JSON parsing is a 400.
impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        match status {
            StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNSUPPORTED_MEDIA_TYPE => {
                RelayError::RejectedBody {
                    status,
                    details: rejection.body_text(),
                }
            }
            _ => RelayError::InvalidRequest(rejection.body_text()),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
