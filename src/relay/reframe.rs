//! Stream reframing: backend NDJSON chat events → client stream events.
//!
//! # Per-line algorithm
//! 1. Blank lines are skipped.
//! 2. Lines that are not a JSON object of the expected shape are skipped.
//! 3. Lines without a non-empty `message.content` emit nothing.
//! 4. Otherwise one event carrying only the fragment is emitted.
//! 5. A line with `done: true` ends the sequence after its own fragment.
//!
//! Skipping is silent on purpose: a malformed line costs at most one token and
//! must never abort a completion that is already on screen.

use serde::{Deserialize, Serialize};

use crate::config::StreamFormat;

/// One parsed line of the backend's streaming output.
#[derive(Debug, Deserialize)]
struct BackendEvent {
    #[serde(default)]
    message: Option<BackendMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct BackendMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct SsePayload<'a> {
    message: SseMessage<'a>,
}

#[derive(Serialize)]
struct SseMessage<'a> {
    content: &'a str,
}

/// An event written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A text fragment, framed as an SSE `data:` event.
    Fragment(String),
    /// A backend line relayed verbatim.
    Raw(String),
}

impl ClientEvent {
    /// The extracted fragment, if this is a fragment event.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            ClientEvent::Fragment(text) => Some(text),
            ClientEvent::Raw(_) => None,
        }
    }

    /// Wire encoding of the event.
    pub fn encode(&self) -> String {
        match self {
            ClientEvent::Fragment(content) => {
                let payload = SsePayload {
                    message: SseMessage { content },
                };
                // Serializing a struct of string fields cannot fail.
                let json = serde_json::to_string(&payload).unwrap_or_default();
                format!("data: {json}\n\n")
            }
            ClientEvent::Raw(line) => format!("{line}\n"),
        }
    }
}

/// Line-at-a-time reframer state.
#[derive(Debug)]
pub struct StreamReframer {
    format: StreamFormat,
    finished: bool,
    emitted: u64,
    skipped: u64,
}

impl StreamReframer {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            finished: false,
            emitted: 0,
            skipped: 0,
        }
    }

    /// Feed one raw backend line. Returns the event to forward, if any.
    ///
    /// Lines arriving after the completion line are ignored.
    pub fn push_line(&mut self, line: &str) -> Option<ClientEvent> {
        if self.finished {
            return None;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.skipped += 1;
            return None;
        }

        let parsed = serde_json::from_str::<BackendEvent>(trimmed);
        if let Ok(event) = &parsed {
            self.finished = event.done;
        }

        let out = match (self.format, parsed) {
            (StreamFormat::Raw, _) => Some(ClientEvent::Raw(line.to_string())),
            (StreamFormat::Sse, Ok(event)) => event
                .message
                .and_then(|m| m.content)
                .filter(|c| !c.is_empty())
                .map(ClientEvent::Fragment),
            (StreamFormat::Sse, Err(e)) => {
                tracing::trace!(error = %e, "Skipping unparseable backend line");
                None
            }
        };

        match out {
            Some(_) => self.emitted += 1,
            None => self.skipped += 1,
        }
        out
    }

    /// Whether the completion line has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Lines dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
