use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::multipart;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Command-line client for the chat relay", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List models installed on the backend
    Models,
    /// Show the current model
    Current,
    /// Switch the current model
    Use { model: String },
    /// Upload a text document as chat context
    Upload { path: PathBuf },
    /// Drop the uploaded context
    ClearContext,
    /// Send one user message and print the reply
    Chat {
        message: String,
        /// Wait for the full reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Models => {
            let res = client.get(format!("{base}/models")).send().await?;
            print_response(res).await?;
        }
        Commands::Current => {
            let res = client.get(format!("{base}/model")).send().await?;
            print_response(res).await?;
        }
        Commands::Use { model } => {
            let res = client
                .post(format!("{base}/model"))
                .json(&json!({ "model": model }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Upload { path } => {
            let bytes = tokio::fs::read(&path).await?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.txt".to_string());
            let part = multipart::Part::bytes(bytes)
                .file_name(filename)
                .mime_str(content_type_for(&path))?;
            let form = multipart::Form::new().part("file", part);
            let res = client
                .post(format!("{base}/upload"))
                .multipart(form)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::ClearContext => {
            let res = client.delete(format!("{base}/context")).send().await?;
            if res.status().is_success() {
                println!("Context cleared");
            } else {
                print_response(res).await?;
            }
        }
        Commands::Chat { message, no_stream } => {
            let body = json!({
                "messages": [{ "role": "user", "content": message }],
                "stream": !no_stream,
            });
            let res = client
                .post(format!("{base}/v1/chat/completions"))
                .json(&body)
                .send()
                .await?;

            let is_event_stream = res
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("text/event-stream"));

            if is_event_stream {
                print_event_stream(res).await?;
            } else {
                print_response(res).await?;
            }
        }
    }

    Ok(())
}

/// Media type for an upload, from its extension. The relay decides what it accepts.
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "ndjson" | "jsonl" => "application/x-ndjson",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Print the `message.content` of each SSE `data:` event as it arrives.
async fn print_event_stream(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    let mut pending: Vec<u8> = Vec::new();
    let mut body = res.bytes_stream();

    while let Some(chunk) = body.next().await {
        pending.extend_from_slice(&chunk?);
        while let Some(end) = pending.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = pending.drain(..end + 2).collect();
            for line in String::from_utf8_lossy(&event).lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if let Ok(value) = serde_json::from_str::<Value>(data) {
                    if let Some(text) = value["message"]["content"].as_str() {
                        write!(stdout, "{text}")?;
                        stdout.flush()?;
                    }
                }
            }
        }
    }
    writeln!(stdout)?;
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: relay returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    if let Some(content) = json["message"]["content"].as_str() {
        println!("{content}");
    } else {
        println!("{}", serde_json::to_string_pretty(&json)?);
    }
    Ok(())
}
