//! Uploaded document context.
//!
//! # Responsibilities
//! - Hold the latest uploaded document text (last writer wins)
//! - Hand it to the context injector per the configured retention policy
//! - Turn uploaded bytes into text through the `TextExtractor` seam
//!
//! # Design Decisions
//! - Only one blob is live at a time; no versioning
//! - `take` is a single atomic swap, so two concurrent chats under
//!   `consume_once` cannot both receive the same blob
//! - Binary formats (PDF and friends) need an external extractor

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use thiserror::Error;

use crate::config::ContextRetention;

/// Process-wide store for the most recent uploaded context.
#[derive(Debug, Default)]
pub struct DocumentStore {
    blob: ArcSwapOption<String>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored context.
    pub fn set(&self, text: impl Into<String>) {
        self.blob.store(Some(Arc::new(text.into())));
    }

    /// Read the stored context without consuming it.
    pub fn get(&self) -> Option<Arc<String>> {
        self.blob.load_full()
    }

    /// Read and clear the stored context in one step.
    pub fn take(&self) -> Option<Arc<String>> {
        self.blob.swap(None)
    }

    pub fn clear(&self) {
        self.blob.store(None);
    }
}

/// Where the context injector gets its blob from.
pub trait ContextSource: Send + Sync {
    /// Fetch the context for one dispatch, consuming it when `retention` says so.
    fn context(&self, retention: ContextRetention) -> Option<Arc<String>>;
}

impl ContextSource for DocumentStore {
    fn context(&self, retention: ContextRetention) -> Option<Arc<String>> {
        match retention {
            ContextRetention::Persist => self.get(),
            ContextRetention::ConsumeOnce => self.take(),
        }
    }
}

/// Upload failures.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Multipart body has no 'file' field")]
    MissingFile,

    #[error("Malformed multipart body: {0}")]
    Multipart(String),

    #[error("Unsupported media type '{0}'")]
    UnsupportedMediaType(String),

    #[error("Document is not valid UTF-8 text")]
    NotUtf8,

    #[error("Document contains no text")]
    Empty,

    #[error("Upload exceeds the configured size limit")]
    TooLarge,
}

impl UploadError {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::MissingFile => "missing_file",
            UploadError::Multipart(_) => "malformed_upload",
            UploadError::UnsupportedMediaType(_) => "unsupported_media_type",
            UploadError::NotUtf8 => "invalid_encoding",
            UploadError::Empty => "empty_document",
            UploadError::TooLarge => "upload_too_large",
        }
    }
}

/// Converts uploaded bytes into context text.
pub trait TextExtractor: Send + Sync {
    /// Extract text from `bytes`. `content_type` is the part's declared type, if any.
    fn extract(&self, content_type: Option<&str>, bytes: &[u8]) -> Result<String, UploadError>;
}

/// Accepts text-like uploads verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    fn is_textual(mime: &str) -> bool {
        mime.starts_with("text/")
            || matches!(
                mime,
                "application/json"
                    | "application/x-ndjson"
                    | "application/xml"
                    | "application/x-yaml"
                    | "application/yaml"
                    | "application/toml"
                    // Browsers send this for files they can't classify (e.g. `.md` on some platforms).
                    | "application/octet-stream"
            )
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, content_type: Option<&str>, bytes: &[u8]) -> Result<String, UploadError> {
        if let Some(ct) = content_type {
            let mime = ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
            if !Self::is_textual(&mime) {
                return Err(UploadError::UnsupportedMediaType(mime));
            }
        }

        let text = std::str::from_utf8(bytes).map_err(|_| UploadError::NotUtf8)?;
        if text.trim().is_empty() {
            return Err(UploadError::Empty);
        }
        Ok(text.to_string())
    }
}
