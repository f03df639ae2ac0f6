//! Document upload: `POST /upload`, `DELETE /context`.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::http::server::AppState;
use crate::state::UploadError;

const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadAccepted {
    pub filename: Option<String>,
    pub chars: usize,
}

fn multipart_error(e: MultipartError) -> UploadError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::TooLarge
    } else {
        UploadError::Multipart(e.body_text())
    }
}

async fn read_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<UploadAccepted, UploadError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;

        let text = state.extractor.extract(content_type.as_deref(), &bytes)?;
        let chars = text.chars().count();
        state.documents.set(text);

        tracing::info!(filename = ?filename, chars, "Stored uploaded document as context");
        return Ok(UploadAccepted { filename, chars });
    }
    Err(UploadError::MissingFile)
}

/// Store an uploaded document as the chat context.
pub async fn upload_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(m) => m,
        Err(rejection) => {
            return RelayError::from(UploadError::Multipart(rejection.body_text())).into_response()
        }
    };

    match read_upload(&state, multipart).await {
        Ok(accepted) => Json(accepted).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Upload rejected");
            RelayError::from(e).into_response()
        }
    }
}

/// Drop the stored context.
pub async fn clear_context(State(state): State<AppState>) -> StatusCode {
    state.documents.clear();
    tracing::info!("Document context cleared");
    StatusCode::NO_CONTENT
}
