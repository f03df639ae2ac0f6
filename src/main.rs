//! Chat relay.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ http::server ──▶ relay::inject ──▶ backend::client ──▶ inference
//!                                                       │               backend
//!   client ◀── http::response ◀── relay::reframe ◀──────┘
//!
//!   shared state:   state::models, state::documents
//!   cross-cutting:  config, observability, lifecycle
//! ```

use std::path::PathBuf;

use clap::Parser;

use chat_relay::lifecycle::{self, Overrides};

#[derive(Parser)]
#[command(name = "chat-relay", version)]
#[command(about = "HTTP relay in front of a local chat-model backend", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Backend base URL, overriding `backend.base_url`.
    #[arg(long)]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    lifecycle::run(Overrides {
        config_path: cli.config,
        bind: cli.bind,
        backend: cli.backend,
    })
    .await?;
    Ok(())
}
