//! HTTP client for the inference backend.
//!
//! # Responsibilities
//! - Dispatch chat requests in buffered or streaming mode
//! - List installed models and send warmup generations
//! - Classify transport failures (unreachable vs. timeout)
//!
//! # Design Decisions
//! - No timeout unless configured: full generations may take minutes
//! - Buffered non-2xx responses are returned, not raised, so the relay can
//!   pass them through unchanged
//! - Streaming bodies are read lazily, one line at a time

use std::pin::Pin;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::backend::lines::lines;
use crate::config::BackendConfig;
use crate::error::{RelayError, RelayResult};
use crate::http::request::X_REQUEST_ID;
use crate::relay::types::ChatRequest;

const CHAT_PATH: &str = "api/chat";
const GENERATE_PATH: &str = "api/generate";
const TAGS_PATH: &str = "api/tags";

/// Failure to construct a backend client from configuration.
#[derive(Debug, Error)]
pub enum BackendInitError {
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A complete backend response.
#[derive(Debug)]
pub struct BufferedResult {
    pub status: StatusCode,
    /// Decoded body, or the reason it could not be decoded.
    pub body: Result<Value, serde_json::Error>,
}

type LineStream = Pin<Box<dyn Stream<Item = Result<String, reqwest::Error>> + Send>>;

/// Lazy, finite, non-restartable sequence of raw lines from a streaming backend response.
///
/// Dropping it closes the backend connection.
pub struct EventSource {
    lines: LineStream,
}

impl EventSource {
    pub fn new(lines: LineStream) -> Self {
        Self { lines }
    }

    /// Build a source over in-memory lines.
    pub fn from_lines<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self::new(Box::pin(futures_util::stream::iter(lines.into_iter().map(Ok))))
    }

    /// Wait for the next line. `None` once the backend has closed the body.
    pub async fn next_line(&mut self) -> Option<Result<String, reqwest::Error>> {
        self.lines.next().await
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource").finish_non_exhaustive()
    }
}

/// Outcome of a chat dispatch.
#[derive(Debug)]
pub enum Dispatch {
    Buffered(BufferedResult),
    Streaming(EventSource),
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Client for the inference server's HTTP API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Url,
}

impl BackendClient {
    /// Create a client from configuration.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendInitError> {
        let mut base_url = Url::parse(&config.base_url)?;
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = reqwest::Client::builder().no_proxy();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            http: builder.build()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Url {
        // Joining a relative path onto a base ending in '/' cannot fail.
        self.base_url.join(path).unwrap_or_else(|_| self.base_url.clone())
    }

    /// Forward a chat request.
    ///
    /// In streaming mode a non-2xx answer is still returned buffered: no event
    /// stream has started, so the status can be relayed as is.
    pub async fn dispatch(
        &self,
        request: &ChatRequest,
        streaming: bool,
        request_id: Option<&str>,
    ) -> RelayResult<Dispatch> {
        let mut builder = self.http.post(self.endpoint(CHAT_PATH)).json(request);
        if let Some(id) = request_id {
            builder = builder.header(X_REQUEST_ID, id);
        }

        let response = builder.send().await.map_err(RelayError::from_transport)?;
        let status = response.status();

        tracing::debug!(
            request_id = request_id.unwrap_or("unknown"),
            status = %status,
            streaming,
            "Backend responded"
        );

        if streaming && status.is_success() {
            let source = lines(response.bytes_stream());
            return Ok(Dispatch::Streaming(EventSource::new(Box::pin(source))));
        }

        let bytes = response.bytes().await.map_err(RelayError::from_transport)?;
        Ok(Dispatch::Buffered(BufferedResult {
            status,
            body: serde_json::from_slice(&bytes),
        }))
    }

    /// Names of the models installed on the backend.
    pub async fn list_models(&self) -> RelayResult<Vec<String>> {
        let response = self
            .http
            .get(self.endpoint(TAGS_PATH))
            .send()
            .await
            .map_err(RelayError::from_transport)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(RelayError::from_transport)?;
        if !status.is_success() {
            return Err(RelayError::BackendRejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let tags: TagsResponse =
            serde_json::from_slice(&bytes).map_err(RelayError::InvalidBackendJson)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Ask the backend to load `model` with an empty generation.
    pub async fn warmup(&self, model: &str, keep_alive: Option<&str>) -> RelayResult<()> {
        let mut payload = json!({
            "model": model,
            "prompt": "",
            "stream": false,
        });
        if let Some(keep_alive) = keep_alive {
            payload["keep_alive"] = Value::String(keep_alive.to_string());
        }

        let response = self
            .http
            .post(self.endpoint(GENERATE_PATH))
            .json(&payload)
            .send()
            .await
            .map_err(RelayError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::BackendRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
