//! Inference backend subsystem.
//!
//! # Data Flow
//! ```text
//! relay → client.rs (POST /api/chat)
//!     buffered:  status + decoded JSON body
//!     streaming: response body bytes
//!         → lines.rs (chunk → line)
//!         → EventSource (lazy line sequence)
//! ```

pub mod client;
pub mod lines;

pub use client::{BackendClient, BackendInitError, BufferedResult, Dispatch, EventSource};
