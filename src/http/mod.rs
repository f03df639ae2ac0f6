//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, shared state)
//!     → request.rs (request ID)
//!     → chat.rs / models.rs / upload.rs (handlers)
//!     → response.rs (JSON, error bodies, event streams)
//!     → Send to client
//! ```

pub mod chat;
pub mod models;
pub mod request;
pub mod response;
pub mod server;
pub mod upload;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
