//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, request ID, CORS, upload limits)
//! - Hold shared state (model registry, document store, backend client)
//! - Apply hot-reloaded configuration
//! - Bind server to listener, plain or TLS

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::TraceLayer,
    ServiceBuilderExt,
};

use crate::backend::{BackendClient, BackendInitError};
use crate::config::{CorsConfig, RelayConfig};
use crate::http::request::MakeRequestUuid;
use crate::http::{chat, models, upload};
use crate::relay::{InjectionPolicy, Relay};
use crate::state::{DocumentStore, ModelRegistry, PlainTextExtractor, TextExtractor};

/// Upper bound on connection draining after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The reloadable part of the server: configuration plus the client built from it.
#[derive(Debug)]
pub struct Runtime {
    pub config: RelayConfig,
    pub backend: BackendClient,
}

impl Runtime {
    pub fn new(config: RelayConfig) -> Result<Self, BackendInitError> {
        let backend = BackendClient::new(&config.backend)?;
        Ok(Self { config, backend })
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ArcSwap<Runtime>>,
    pub models: Arc<ModelRegistry>,
    pub documents: Arc<DocumentStore>,
    pub extractor: Arc<dyn TextExtractor>,
    draining: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Result<Self, BackendInitError> {
        let models = Arc::new(ModelRegistry::new(config.models.default_model.clone()));
        let runtime = Runtime::new(config)?;
        Ok(Self {
            runtime: Arc::new(ArcSwap::from_pointee(runtime)),
            models,
            documents: Arc::new(DocumentStore::new()),
            extractor: Arc::new(PlainTextExtractor),
            draining: Arc::new(watch::channel(false).0),
        })
    }

    /// Snapshot of the current runtime.
    pub fn runtime(&self) -> Arc<Runtime> {
        self.runtime.load_full()
    }

    /// Build a relay over the current runtime snapshot.
    pub fn relay(&self) -> Relay {
        let runtime = self.runtime();
        let config = &runtime.config;
        Relay::new(
            runtime.backend.clone(),
            self.models.clone(),
            self.documents.clone(),
            InjectionPolicy::from_config(&config.context, &config.relay),
            config.relay.stream_format,
            self.draining.subscribe(),
        )
    }

    /// Tell open event streams to finish so graceful shutdown can complete.
    pub fn drain(&self) {
        self.draining.send_replace(true);
    }

    /// Swap in a reloaded configuration.
    ///
    /// The current model and stored context are process state and survive the reload.
    pub fn apply_config(&self, config: RelayConfig) -> Result<(), BackendInitError> {
        let runtime = Runtime::new(config)?;
        tracing::info!(
            backend = %runtime.backend.base_url(),
            force_stream = runtime.config.relay.force_stream,
            retention = ?runtime.config.context.retention,
            "Configuration reloaded"
        );
        self.runtime.store(Arc::new(runtime));
        Ok(())
    }
}

/// HTTP server for the chat relay.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: RelayConfig) -> Result<Self, BackendInitError> {
        let router_config = config.clone();
        let state = AppState::new(config)?;
        let router = Self::build_router(&router_config, state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &RelayConfig, state: AppState) -> Router {
        let upload_routes = Router::new()
            .route("/upload", post(upload::upload_document))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(config.uploads.max_body_bytes));

        let mut router = Router::new()
            .route("/v1/chat/completions", post(chat::chat_completions))
            .route("/models", get(models::list_models))
            .route("/model", get(models::current_model).post(models::set_model))
            .route("/context", delete(upload::clear_context))
            .route("/health", get(health))
            .merge(upload_routes)
            .with_state(state);

        if let Some(dir) = &config.static_files.dir {
            tracing::info!(dir = %dir, "Serving static files");
            router = router.fallback_service(ServeDir::new(dir));
        }

        // CORS sits inside tracing: `Cors` needs a `Default` response body.
        // The id is set before tracing sees the request.
        router.layer(cors_layer(&config.cors)).layer(
            ServiceBuilder::new()
                .set_x_request_id(MakeRequestUuid)
                .layer(TraceLayer::new_for_http())
                .propagate_x_request_id(),
        )
    }

    /// Shared state, e.g. for inspection in tests.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<RelayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(apply_updates(self.state.clone(), config_updates, shutdown.resubscribe()));

        let state = self.state.clone();
        let mut deadline = shutdown.resubscribe();
        let serve = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining open streams");
                state.drain();
            })
            .into_future();

        tokio::select! {
            result = serve => result?,
            _ = async {
                let _ = deadline.recv().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => tracing::warn!("Grace period elapsed with requests still open"),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<RelayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        tokio::spawn(apply_updates(self.state.clone(), config_updates, shutdown.resubscribe()));

        let handle = axum_server::Handle::new();
        let signal_handle = handle.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received, draining open streams");
            state.drain();
            signal_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

async fn apply_updates(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<RelayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => {
                    if let Err(e) = state.apply_config(config) {
                        tracing::error!(error = %e, "Rejected reloaded configuration");
                    }
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
