//! Response relay: dispatch one chat request and shape the reply.
//!
//! # State Machine
//! ```text
//!             ┌── stream=false ──▶ dispatch ──▶ decode ──▶ Json(status, body)
//! request ────┤                                    └─ bad JSON ──▶ InvalidBackendJson (500)
//!             └── stream=true  ──▶ dispatch ──▶ 2xx ──▶ pump task ──▶ Stream(events)
//!                                      └─ non-2xx ──▶ same as buffered
//! ```
//!
//! The pump task owns the backend connection. It forwards each event as soon as
//! the reframer produces it and stops as soon as the client side goes away, so
//! the backend connection is released with it. It also stops when the server
//! starts draining, which lets graceful shutdown finish with streams open.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::backend::{BackendClient, BufferedResult, Dispatch, EventSource};
use crate::config::StreamFormat;
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::relay::inject::{ContextInjector, InjectionPolicy};
use crate::relay::reframe::StreamReframer;
use crate::relay::types::ChatRequest;
use crate::state::{ContextSource, ModelRegistry};

/// In-flight events between the pump task and the client connection.
/// One slot keeps backpressure tight: the pump reads ahead by at most one event.
const EVENT_BUFFER: usize = 1;

/// How a streamed response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The backend sent its completion line.
    Completed,
    /// The backend closed the body without a completion line.
    BackendEof,
    /// Reading from the backend failed mid-stream.
    BackendError,
    /// The client went away first.
    ClientDisconnected,
    /// The server is shutting down.
    Shutdown,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::BackendEof => "backend_eof",
            StreamOutcome::BackendError => "backend_error",
            StreamOutcome::ClientDisconnected => "client_disconnected",
            StreamOutcome::Shutdown => "shutdown",
        }
    }
}

/// Encoded client events, in backend order.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<String>,
    format: StreamFormat,
}

impl EventStream {
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Receive the next encoded event.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Adapt into a body stream. Dropping it signals the pump task to stop.
    pub fn into_body_stream(self) -> impl Stream<Item = Result<String, Infallible>> + Send {
        futures_util::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk), rx))
        })
    }
}

/// What the relay hands back to the HTTP layer.
#[derive(Debug)]
pub enum RelayReply {
    /// A complete JSON body with the backend's status.
    Json { status: StatusCode, body: Value },
    /// A live event stream.
    Stream(EventStream),
}

/// Orchestrates injection, dispatch and reframing for chat requests.
pub struct Relay {
    backend: BackendClient,
    models: Arc<ModelRegistry>,
    documents: Arc<dyn ContextSource>,
    policy: InjectionPolicy,
    format: StreamFormat,
    draining: watch::Receiver<bool>,
}

impl Relay {
    pub fn new(
        backend: BackendClient,
        models: Arc<ModelRegistry>,
        documents: Arc<dyn ContextSource>,
        policy: InjectionPolicy,
        format: StreamFormat,
        draining: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            models,
            documents,
            policy,
            format,
            draining,
        }
    }

    /// Relay one chat request. Opens exactly one backend connection.
    pub async fn handle(&self, request: ChatRequest, request_id: &str) -> RelayResult<RelayReply> {
        let model = self.models.current();
        let injector = ContextInjector::new(self.documents.as_ref(), self.policy);
        let outgoing = injector.inject(request, &model);
        let streaming = outgoing.wants_stream();

        tracing::info!(
            request_id = %request_id,
            model = %model,
            stream = streaming,
            messages = outgoing.messages.len(),
            "Dispatching chat request"
        );

        let dispatch = match self.backend.dispatch(&outgoing, streaming, Some(request_id)).await {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Backend dispatch failed");
                metrics::record_backend_error(e.kind());
                return Err(e);
            }
        };

        match dispatch {
            Dispatch::Buffered(result) => buffered_reply(result, request_id),
            Dispatch::Streaming(source) => Ok(RelayReply::Stream(self.start_stream(
                source,
                request_id.to_string(),
            ))),
        }
    }

    fn start_stream(&self, source: EventSource, request_id: String) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reframer = StreamReframer::new(self.format);
        let draining = self.draining.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let (outcome, reframer) = pump(source, reframer, tx, draining, &request_id).await;
            metrics::record_stream_closed(outcome.as_str());
            tracing::info!(
                request_id = %request_id,
                outcome = outcome.as_str(),
                events = reframer.emitted(),
                skipped = reframer.skipped(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stream closed"
            );
        });
        EventStream {
            rx,
            format: self.format,
        }
    }
}

fn buffered_reply(result: BufferedResult, request_id: &str) -> RelayResult<RelayReply> {
    match result.body {
        Ok(body) => Ok(RelayReply::Json {
            status: result.status,
            body,
        }),
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                status = %result.status,
                error = %e,
                "Backend body is not valid JSON"
            );
            metrics::record_backend_error("invalid_backend_response");
            Err(RelayError::InvalidBackendJson(e))
        }
    }
}

/// Resolve once `draining` turns true. A dropped sender never drains.
async fn drained(draining: &mut watch::Receiver<bool>) {
    if draining.wait_for(|d| *d).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Move events from the backend to the client until either side is done.
///
/// Returns the reframer so the caller can report its counters.
pub async fn pump(
    mut source: EventSource,
    mut reframer: StreamReframer,
    tx: mpsc::Sender<String>,
    mut draining: watch::Receiver<bool>,
    request_id: &str,
) -> (StreamOutcome, StreamReframer) {
    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => return (StreamOutcome::ClientDisconnected, reframer),
            _ = drained(&mut draining) => return (StreamOutcome::Shutdown, reframer),
            line = source.next_line() => line,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::warn!(request_id = %request_id, error = %e, "Backend stream read failed");
                metrics::record_backend_error("stream_read");
                return (StreamOutcome::BackendError, reframer);
            }
            None => return (StreamOutcome::BackendEof, reframer),
        };

        if let Some(event) = reframer.push_line(&line) {
            if tx.send(event.encode()).await.is_err() {
                return (StreamOutcome::ClientDisconnected, reframer);
            }
            metrics::record_stream_event();
        }

        if reframer.is_finished() {
            return (StreamOutcome::Completed, reframer);
        }
    }
}
