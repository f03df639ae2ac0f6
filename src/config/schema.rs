//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the chat relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Inference backend location and timeouts.
    pub backend: BackendConfig,

    /// Model selection defaults.
    pub models: ModelsConfig,

    /// Context injection policy.
    pub context: ContextConfig,

    /// Response relay policy.
    pub relay: RelayPolicyConfig,

    /// Upload limits.
    pub uploads: UploadConfig,

    /// Cross-origin policy.
    pub cors: CorsConfig,

    /// Optional static asset hosting.
    pub static_files: StaticFilesConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Inference backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the inference server (e.g., "http://localhost:11434").
    pub base_url: String,

    /// Total request timeout in seconds. `None` waits forever, since a full
    /// generation can take minutes.
    pub request_timeout_secs: Option<u64>,

    /// Connection establishment timeout in seconds. `None` waits forever.
    pub connect_timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            request_timeout_secs: None,
            connect_timeout_secs: None,
        }
    }
}

/// Model selection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model used until a client selects another one.
    pub default_model: String,

    /// Send a warmup generation to the backend after a model switch.
    pub warmup_on_switch: bool,

    /// `keep_alive` value forwarded with the warmup call.
    pub keep_alive: Option<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: "llama3".to_string(),
            warmup_on_switch: true,
            keep_alive: None,
        }
    }
}

/// Role assigned to the injected context message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextRole {
    #[default]
    System,
    User,
}

impl ContextRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextRole::System => "system",
            ContextRole::User => "user",
        }
    }
}

/// What happens to the uploaded context after it has been injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextRetention {
    /// The context stays live and is injected into every chat request until replaced or cleared.
    #[default]
    Persist,
    /// The context is injected into the next chat request only.
    ConsumeOnce,
}

/// Context injection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum characters of context injected (0 disables truncation).
    pub max_chars: usize,

    /// Role of the injected message.
    pub role: ContextRole,

    /// Retention policy for the stored context.
    pub retention: ContextRetention,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: 5000,
            role: ContextRole::System,
            retention: ContextRetention::Persist,
        }
    }
}

/// Framing used for streamed responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    /// `data: {"message":{"content":...}}\n\n` per fragment.
    #[default]
    Sse,
    /// Backend lines passed through unchanged, newline terminated.
    Raw,
}

/// Response relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayPolicyConfig {
    /// Stream every response regardless of the client's `stream` flag.
    pub force_stream: bool,

    /// Stream framing.
    pub stream_format: StreamFormat,
}

/// Upload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum upload body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Static file hosting.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Directory served for paths not matched by the API.
    pub dir: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
