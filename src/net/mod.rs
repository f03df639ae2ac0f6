//! Network layer subsystem.
//!
//! Plain TCP listeners are bound directly in startup; this module only holds
//! the TLS material loading used when `listener.tls` is configured.

pub mod tls;

pub use tls::load_tls_config;
