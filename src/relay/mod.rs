//! Chat relay core.
//!
//! # Data Flow
//! ```text
//! ChatRequest (client)
//!     → inject.rs   (context blob first, current model, explicit stream flag)
//!     → backend::client (one connection per request)
//!     → pipeline.rs (buffered JSON, or pump task)
//!         → reframe.rs (NDJSON line → client event)
//!     → http layer (JSON body or text/event-stream)
//! ```
//!
//! # Design Decisions
//! - Malformed stream lines are dropped, never surfaced mid-stream
//! - Events are forwarded one by one, in backend order
//! - A client disconnect ends the pump task and releases the backend connection

pub mod inject;
pub mod pipeline;
pub mod reframe;
pub mod types;

pub use inject::{ContextInjector, InjectionPolicy};
pub use pipeline::{EventStream, Relay, RelayReply, StreamOutcome};
pub use reframe::{ClientEvent, StreamReframer};
pub use types::{ChatMessage, ChatRequest};
