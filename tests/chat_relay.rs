//! End-to-end tests for `POST /v1/chat/completions`.

use std::time::Duration;

use chat_relay::config::StreamFormat;
use futures_util::StreamExt;
use serde_json::{json, Value};

mod common;
use common::{chunk, client, config_for, start_backend, start_relay, Reply};

fn user_chat(stream: Option<bool>) -> Value {
    let mut body = json!({
        "model": "client-picked",
        "messages": [{ "role": "user", "content": "hello" }],
        "options": { "temperature": 0.2 },
    });
    if let Some(stream) = stream {
        body["stream"] = json!(stream);
    }
    body
}

#[tokio::test]
async fn buffered_reply_is_relayed_verbatim() {
    let reply = r#"{"model":"llama3","message":{"role":"assistant","content":"hi there"},"done":true}"#;
    let backend = start_backend(move |_| Reply::json(200, reply)).await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(Some(false)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, serde_json::from_str::<Value>(reply).unwrap());

    let sent = backend.captured_at("/api/chat");
    assert_eq!(sent.len(), 1);
    let forwarded = sent[0].json();
    assert_eq!(forwarded["model"], "llama3");
    assert_eq!(forwarded["stream"], false);
    assert_eq!(forwarded["options"]["temperature"], 0.2);
    assert_eq!(forwarded["messages"], json!([{ "role": "user", "content": "hello" }]));
    assert!(sent[0].header("x-request-id").is_some());
}

#[tokio::test]
async fn request_id_is_forwarded_to_backend() {
    let backend = start_backend(|_| Reply::json(200, r#"{"done":true}"#)).await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .header("x-request-id", "trace-me-42")
        .json(&user_chat(None))
        .send()
        .await
        .unwrap();

    assert_eq!(res.headers()["x-request-id"], "trace-me-42");
    let sent = backend.captured_at("/api/chat");
    assert_eq!(sent[0].header("x-request-id"), Some("trace-me-42"));
}

#[tokio::test]
async fn backend_error_status_passes_through() {
    let backend =
        start_backend(|_| Reply::json(503, r#"{"error":"model is loading"}"#)).await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(None))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "error": "model is loading" }));
}

#[tokio::test]
async fn invalid_backend_json_becomes_structured_500() {
    let backend = start_backend(|_| Reply::json(200, "<html>oops</html>")).await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(None))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 500);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_backend_response");
    assert!(!body["details"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_502() {
    // Reserve a port, then free it so nothing is listening.
    let closed = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let relay = start_relay(config_for(&format!("http://{closed}"))).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(None))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "backend_unreachable");
}

#[tokio::test]
async fn malformed_client_body_is_400() {
    let backend = start_backend(|_| Reply::json(200, "{}")).await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .header("content-type", "application/json")
        .body(r#"{"messages": "not a list"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");
    assert!(backend.captured().is_empty());
}

#[tokio::test]
async fn streaming_reframes_fragments_as_sse() {
    let backend = start_backend(|_| {
        Reply::lines([
            chunk("Hel", false),
            "not json at all".to_string(),
            String::new(),
            chunk("lo", false),
            chunk("", true),
            chunk("after done", false),
        ])
    })
    .await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(Some(true)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "text/event-stream");
    assert_eq!(res.headers()["x-accel-buffering"], "no");

    let body = res.text().await.unwrap();
    assert_eq!(
        body,
        "data: {\"message\":{\"content\":\"Hel\"}}\n\n\
         data: {\"message\":{\"content\":\"lo\"}}\n\n"
    );

    let forwarded = backend.captured_at("/api/chat")[0].json();
    assert_eq!(forwarded["stream"], true);
}

#[tokio::test]
async fn first_fragment_arrives_before_backend_finishes() {
    let backend = start_backend(|_| Reply::Stream {
        lines: vec![chunk("early", false), chunk("late", true)],
        delay: Duration::from_millis(400),
    })
    .await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(Some(true)))
        .send()
        .await
        .unwrap();

    let mut body = res.bytes_stream();
    let first = tokio::time::timeout(Duration::from_millis(700), body.next())
        .await
        .expect("first event should not wait for the whole generation")
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&first).contains("early"));
}

#[tokio::test]
async fn raw_format_passes_backend_lines_through() {
    let lines = vec![chunk("a", false), "garbage".to_string(), chunk("b", true)];
    let expected: String = lines.iter().map(|l| format!("{l}\n")).collect();
    let backend = start_backend(move |_| Reply::lines(lines.clone())).await;

    let mut config = config_for(&backend.url());
    config.relay.stream_format = StreamFormat::Raw;
    let relay = start_relay(config).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(Some(true)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.headers()["content-type"], "text/event-stream");
    assert_eq!(res.text().await.unwrap(), expected);
}

#[tokio::test]
async fn force_stream_overrides_client_choice() {
    let backend = start_backend(|_| Reply::lines([chunk("x", true)])).await;
    let mut config = config_for(&backend.url());
    config.relay.force_stream = true;
    let relay = start_relay(config).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(Some(false)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.headers()["content-type"], "text/event-stream");
    assert_eq!(res.text().await.unwrap(), "data: {\"message\":{\"content\":\"x\"}}\n\n");
    assert_eq!(backend.captured_at("/api/chat")[0].json()["stream"], true);
}

#[tokio::test]
async fn streaming_request_with_backend_error_relays_status() {
    let backend = start_backend(|_| Reply::json(404, r#"{"error":"model not found"}"#)).await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(Some(true)))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "model not found");
}

#[tokio::test]
async fn client_disconnect_releases_backend_stream() {
    let backend = start_backend(|_| Reply::Endless {
        line: chunk("tok", false),
        delay: Duration::from_millis(10),
    })
    .await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(Some(true)))
        .send()
        .await
        .unwrap();
    let mut body = res.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("tok"));
    drop(body);

    let released = async {
        while backend.disconnects.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), released)
        .await
        .expect("backend connection should close after the client leaves");
}

#[tokio::test]
async fn concurrent_streams_do_not_interleave() {
    let backend = start_backend(|req| {
        let tag = req.json()["messages"][0]["content"].as_str().unwrap().to_string();
        Reply::lines((0..5).map(|i| chunk(&format!("{tag}-{i}"), i == 4)).collect::<Vec<_>>())
    })
    .await;
    let relay = start_relay(config_for(&backend.url())).await;

    let mut tasks = Vec::new();
    for tag in ["a", "b", "c"] {
        let url = relay.url("/v1/chat/completions");
        tasks.push(tokio::spawn(async move {
            let body = json!({
                "messages": [{ "role": "user", "content": tag }],
                "stream": true,
            });
            let text = client().post(url).json(&body).send().await.unwrap().text().await.unwrap();
            (tag, text)
        }));
    }

    for task in tasks {
        let (tag, text) = task.await.unwrap();
        let expected: String = (0..5)
            .map(|i| format!("data: {{\"message\":{{\"content\":\"{tag}-{i}\"}}}}\n\n"))
            .collect();
        assert_eq!(text, expected);
    }
}

#[tokio::test]
async fn missing_content_type_is_415() {
    let backend = start_backend(|_| Reply::json(200, "{}")).await;
    let relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .body(user_chat(None).to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 415);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unsupported_media_type");
    assert!(backend.captured().is_empty());
}

#[tokio::test]
async fn shutdown_ends_open_streams() {
    let backend = start_backend(|_| Reply::Endless {
        line: chunk("tok", false),
        delay: Duration::from_millis(10),
    })
    .await;
    let mut relay = start_relay(config_for(&backend.url())).await;

    let res = client()
        .post(relay.url("/v1/chat/completions"))
        .json(&user_chat(Some(true)))
        .send()
        .await
        .unwrap();
    let mut body = res.bytes_stream();
    assert!(body.next().await.unwrap().is_ok());

    let reader = tokio::spawn(async move { while let Some(Ok(_)) = body.next().await {} });

    tokio::time::timeout(Duration::from_secs(5), relay.stop())
        .await
        .expect("server should stop without waiting for the backend to finish");
    tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("client stream should end on shutdown")
        .unwrap();
}
