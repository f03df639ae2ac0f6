//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration, then apply command-line overrides
//! - Initialize logging and metrics
//! - Start the config watcher when a file is in use
//! - Bind the listener (plain or TLS) and serve until a shutdown signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Overrides are re-applied to every reloaded config, so a `--backend`
//!   given on the command line wins over the file for the whole run

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::backend::BackendInitError;
use crate::config::validation::{validate_config, ValidationError};
use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, ConfigError, RelayConfig};
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::net::load_tls_config;
use crate::observability::{logging, metrics};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid configuration after overrides: {}", join(.0))]
    Overrides(Vec<ValidationError>),

    #[error("Failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("Failed to build backend client: {0}")]
    Backend(#[from] BackendInitError),

    #[error("Invalid bind address {address}: {source}")]
    BindAddress {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("Failed to start config watcher: {0}")]
    Watcher(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub bind: Option<String>,
    pub backend: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend.base_url = backend.clone();
        }
    }

    /// Load the file (or defaults) and apply overrides.
    pub fn resolve(&self) -> Result<RelayConfig, StartupError> {
        let mut config = match &self.config_path {
            Some(path) => load_config(path)?,
            None => RelayConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(StartupError::Overrides)?;
        Ok(config)
    }
}

/// Run the relay until a shutdown signal arrives.
pub async fn run(overrides: Overrides) -> Result<(), StartupError> {
    let config = overrides.resolve()?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?overrides.config_path,
        bind_address = %config.listener.bind_address,
        backend = %config.backend.base_url,
        default_model = %config.models.default_model,
        "chat-relay starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher handle must outlive the server.
    let (updates, _watcher) = spawn_watcher(&overrides)?;

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config.clone())?;

    let server_shutdown = shutdown.subscribe();
    let serve = async {
        match &config.listener.tls {
            Some(tls) => {
                let addr: SocketAddr = config.listener.bind_address.parse().map_err(|source| {
                    StartupError::BindAddress {
                        address: config.listener.bind_address.clone(),
                        source,
                    }
                })?;
                let rustls = load_tls_config(tls).await?;
                server.run_tls(addr, rustls, updates, server_shutdown).await?;
            }
            None => {
                let listener = TcpListener::bind(&config.listener.bind_address).await?;
                server.run(listener, updates, server_shutdown).await?;
            }
        }
        Ok::<(), StartupError>(())
    };
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result?,
        _ = shutdown_signal() => {
            shutdown.trigger();
            serve.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

type Watch = (
    mpsc::UnboundedReceiver<RelayConfig>,
    Option<notify::RecommendedWatcher>,
);

fn spawn_watcher(overrides: &Overrides) -> Result<Watch, StartupError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let Some(path) = &overrides.config_path else {
        return Ok((rx, None));
    };

    let (watcher, mut raw) = ConfigWatcher::new(path);
    let handle = watcher.run()?;

    let overrides = overrides.clone();
    tokio::spawn(async move {
        while let Some(mut config) = raw.recv().await {
            overrides.apply(&mut config);
            if tx.send(config).is_err() {
                break;
            }
        }
    });

    Ok((rx, Some(handle)))
}
