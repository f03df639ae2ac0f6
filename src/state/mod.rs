//! Process-wide shared state.
//!
//! # Data Flow
//! ```text
//! POST /model  → models.rs (swap current model)  → read by every chat dispatch
//! POST /upload → documents.rs (swap context blob) → read (or taken) by the injector
//! ```
//!
//! # Design Decisions
//! - Each value is a single atomic reference swap (arc-swap); no locks
//! - State is injected into handlers through `AppState`, never global

pub mod documents;
pub mod models;

pub use documents::{ContextSource, DocumentStore, PlainTextExtractor, TextExtractor, UploadError};
pub use models::ModelRegistry;
