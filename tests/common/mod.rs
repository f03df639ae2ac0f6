//! Shared utilities for integration tests.
//!
//! The mock backend speaks just enough HTTP/1.1 over raw TCP to play the
//! inference server: it captures each request and answers with a fixed body,
//! a paced NDJSON stream, or an endless stream that reports when the reader
//! goes away.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_relay::config::RelayConfig;
use chat_relay::http::{AppState, HttpServer};
use chat_relay::lifecycle::Shutdown;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A request as seen by the mock backend.
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// How the mock backend answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Body { status: u16, body: String },
    Stream { lines: Vec<String>, delay: Duration },
    /// Stream the same line until the reader disconnects.
    Endless { line: String, delay: Duration },
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Reply::Body {
            status,
            body: body.to_string(),
        }
    }

    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Reply::Stream {
            lines: lines.into_iter().map(Into::into).collect(),
            delay: Duration::from_millis(5),
        }
    }
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<Captured>>>,
    pub disconnects: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests to `path`, in arrival order.
    pub fn captured_at(&self, path: &str) -> Vec<Captured> {
        self.captured().into_iter().filter(|c| c.path == path).collect()
    }

    /// Poll until `path` has been hit `count` times or the deadline passes.
    pub async fn wait_for(&self, path: &str, count: usize) -> Vec<Captured> {
        for _ in 0..100 {
            let hits = self.captured_at(path);
            if hits.len() >= count {
                return hits;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.captured_at(path)
    }
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<Captured> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(Captured {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

/// Start a mock backend on an ephemeral port. `respond` picks the reply per request.
pub async fn start_backend<F>(respond: F) -> MockBackend
where
    F: Fn(&Captured) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);

    let (reqs, discs) = (requests.clone(), disconnects.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let (respond, reqs, discs) = (respond.clone(), reqs.clone(), discs.clone());
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let reply = respond(&request);
                reqs.lock().unwrap().push(request);

                match reply {
                    Reply::Body { status, body } => {
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_line(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                    }
                    Reply::Stream { lines, delay } => {
                        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n";
                        if socket.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        for line in lines {
                            tokio::time::sleep(delay).await;
                            if socket.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                    Reply::Endless { line, delay } => {
                        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n";
                        if socket.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        loop {
                            tokio::time::sleep(delay).await;
                            let sent = socket.write_all(format!("{line}\n").as_bytes()).await;
                            if sent.is_err() || socket.flush().await.is_err() {
                                discs.fetch_add(1, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    MockBackend {
        addr,
        requests,
        disconnects,
    }
}

/// A relay running on an ephemeral port. Dropping it stops the server.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub state: AppState,
    pub config_updates: mpsc::UnboundedSender<RelayConfig>,
    shutdown: Shutdown,
    server: Option<JoinHandle<()>>,
}

impl TestRelay {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the serve loop to return.
    pub async fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(server) = self.server.take() {
            server.await.unwrap();
        }
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Default config pointed at `backend_url`.
pub fn config_for(backend_url: &str) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.backend.base_url = backend_url.to_string();
    config
}

pub async fn start_relay(config: RelayConfig) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).unwrap();
    let state = server.state().clone();

    let shutdown = Shutdown::new();
    let (config_updates, updates_rx) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    let server = tokio::spawn(async move {
        let _ = server.run(listener, updates_rx, server_shutdown).await;
    });

    TestRelay {
        addr,
        state,
        config_updates,
        shutdown,
        server: Some(server),
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// NDJSON chat line carrying `content`.
pub fn chunk(content: &str, done: bool) -> String {
    serde_json::json!({
        "model": "llama3",
        "message": { "role": "assistant", "content": content },
        "done": done,
    })
    .to_string()
}
