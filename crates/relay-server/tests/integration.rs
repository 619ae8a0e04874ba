//! End-to-end tests: a real server, a real WebSocket client, and mocked
//! retrieval and generation backends.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_llm::HttpGenerator;
use relay_retrieval::HttpRetriever;
use relay_runtime::TurnConfig;
use relay_server::{RelayServer, ServerConfig};
use relay_store::MemorySessionStore;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    server: Arc<RelayServer>,
    http: String,
    ws: String,
    _backend: MockServer,
}

/// Boot a relay whose retrieval and generation backends are one mock server.
async fn boot(backend: MockServer) -> TestServer {
    let client = reqwest::Client::new();
    let retriever = HttpRetriever::new(client.clone(), format!("{}/retrieve", backend.uri()));
    let generator = HttpGenerator::new(
        client,
        format!("{}/generate", backend.uri()),
        format!("{}/stream", backend.uri()),
        Duration::from_secs(5),
    );
    let server = Arc::new(RelayServer::new(
        ServerConfig::default(),
        Arc::new(MemorySessionStore::new(Duration::from_secs(600))),
        Arc::new(retriever),
        Arc::new(generator),
        TurnConfig::default(),
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        server,
        http: format!("http://{addr}"),
        ws: format!("ws://{addr}/ws"),
        _backend: backend,
    }
}

async fn mount_retrieval(backend: &MockServer, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path("/retrieve"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(backend)
        .await;
}

async fn mount_stream(backend: &MockServer, frames: &[Value], delay: Option<Duration>) {
    let body: String = frames.iter().map(|f| format!("data: {f}\n\n")).collect();
    let mut response = ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream");
    if let Some(d) = delay {
        response = response.set_delay(d);
    }
    Mock::given(method("POST"))
        .and(path("/stream"))
        .respond_with(response)
        .mount(backend)
        .await;
}

fn paris_snippets() -> Value {
    json!([{ "text": "Paris is the capital of France.", "metadata": { "source": "doc1" } }])
}

async fn connect(url: &str) -> WsStream {
    let (mut ws, _) = connect_async(url).await.unwrap();
    let hello = next_event(&mut ws).await;
    assert_eq!(hello["type"], "connection.established");
    assert!(hello["data"]["clientId"].is_string());
    ws
}

/// Next JSON text frame, skipping control frames.
async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn join(ws: &mut WsStream, session: &str) {
    send(ws, json!({ "type": "init", "sessionId": session })).await;
    let ack = next_event(ws).await;
    assert_eq!(ack["type"], "session_joined");
    assert_eq!(ack["sessionId"], session);
}

/// Read events until a turn-terminal one arrives.
async fn collect_turn(ws: &mut WsStream) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let event = next_event(ws).await;
        let terminal = event["type"] == "bot_done" || event["type"] == "bot_error";
        events.push(event);
        if terminal {
            return events;
        }
    }
}

async fn history(base: &str, session: &str) -> Vec<Value> {
    let body: Value = reqwest::get(format!("{base}/history/{session}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["history"].as_array().unwrap().clone()
}

#[tokio::test]
async fn streaming_turn_reaches_joined_client_and_persists() {
    let backend = MockServer::start().await;
    mount_retrieval(&backend, 200, paris_snippets()).await;
    mount_stream(
        &backend,
        &[
            json!({ "type": "chunk", "text": "Paris" }),
            json!({ "type": "chunk", "text": " is the capital." }),
            json!({ "type": "done", "text": "Paris is the capital." }),
        ],
        None,
    )
    .await;
    let t = boot(backend).await;

    let mut ws = connect(&t.ws).await;
    join(&mut ws, "france").await;
    send(
        &mut ws,
        json!({ "type": "user_message", "sessionId": "france", "message": "What is the capital of France?" }),
    )
    .await;

    let events = collect_turn(&mut ws).await;
    let summary: Vec<(String, Value)> = events
        .iter()
        .map(|e| (e["type"].as_str().unwrap().to_string(), e["data"].clone()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("bot_chunk".to_string(), json!({ "chunk": "Paris" })),
            ("bot_chunk".to_string(), json!({ "chunk": " is the capital." })),
            ("bot_done".to_string(), json!({ "answer": "Paris is the capital." })),
        ]
    );

    // persistence runs alongside delivery of bot_done
    let mut entries = history(&t.http, "france").await;
    for _ in 0..20 {
        if entries.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        entries = history(&t.http, "france").await;
    }
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["role"], "user");
    assert_eq!(entries[0]["text"], "What is the capital of France?");
    assert_eq!(entries[1]["role"], "assistant");
    assert_eq!(entries[1]["text"], "Paris is the capital.");
}

#[tokio::test]
async fn retrieval_error_sends_one_bot_error() {
    let backend = MockServer::start().await;
    mount_retrieval(&backend, 500, json!({ "detail": "index offline" })).await;
    let t = boot(backend).await;

    let mut ws = connect(&t.ws).await;
    join(&mut ws, "s-ret").await;
    send(&mut ws, json!({ "type": "user_message", "sessionId": "s-ret", "message": "hi" })).await;

    let events = collect_turn(&mut ws).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "bot_error");

    let entries = history(&t.http, "s-ret").await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["role"], "user");
}

#[tokio::test]
async fn stream_without_terminal_frame_ends_in_bot_error() {
    let backend = MockServer::start().await;
    mount_retrieval(&backend, 200, paris_snippets()).await;
    mount_stream(
        &backend,
        &[
            json!({ "type": "chunk", "text": "Par" }),
            json!({ "type": "chunk", "text": "is" }),
        ],
        None,
    )
    .await;
    let t = boot(backend).await;

    let mut ws = connect(&t.ws).await;
    join(&mut ws, "s-eof").await;
    send(&mut ws, json!({ "type": "user_message", "sessionId": "s-eof", "message": "q" })).await;

    let events = collect_turn(&mut ws).await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[2]["type"], "bot_error");
    assert_eq!(history(&t.http, "s-eof").await.len(), 1);
}

#[tokio::test]
async fn malformed_frame_gets_error_and_connection_survives() {
    let backend = MockServer::start().await;
    let t = boot(backend).await;

    let mut ws = connect(&t.ws).await;
    ws.send(Message::Text("not json".into())).await.unwrap();
    let err = next_event(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert!(err["data"]["message"].is_string());

    join(&mut ws, "still-alive").await;
}

#[tokio::test]
async fn leave_is_acknowledged() {
    let backend = MockServer::start().await;
    let t = boot(backend).await;

    let mut ws = connect(&t.ws).await;
    join(&mut ws, "s-leave").await;
    assert_eq!(t.server.registry().session_count().await, 1);

    send(&mut ws, json!({ "type": "leave", "sessionId": "s-leave" })).await;
    let ack = next_event(&mut ws).await;
    assert_eq!(ack["type"], "session_left");
    assert_eq!(t.server.registry().session_count().await, 0);
}

#[tokio::test]
async fn disconnect_cancels_in_flight_turn() {
    let backend = MockServer::start().await;
    mount_retrieval(&backend, 200, paris_snippets()).await;
    mount_stream(
        &backend,
        &[json!({ "type": "done", "text": "too late" })],
        Some(Duration::from_secs(30)),
    )
    .await;
    let t = boot(backend).await;

    let mut ws = connect(&t.ws).await;
    join(&mut ws, "s-gone").await;
    send(&mut ws, json!({ "type": "user_message", "sessionId": "s-gone", "message": "q" })).await;

    // wait until the turn holds the session lock
    for _ in 0..40 {
        if !t.server.orchestrator().locks().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(!t.server.orchestrator().locks().is_empty());

    ws.close(None).await.unwrap();
    drop(ws);

    for _ in 0..40 {
        if t.server.orchestrator().locks().is_empty()
            && t.server.registry().connection_count().await == 0
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(t.server.orchestrator().locks().is_empty());
    assert_eq!(t.server.registry().connection_count().await, 0);
    assert_eq!(history(&t.http, "s-gone").await.len(), 1);
}

#[tokio::test]
async fn two_clients_on_one_session_both_hear_the_turn() {
    let backend = MockServer::start().await;
    mount_retrieval(&backend, 200, paris_snippets()).await;
    mount_stream(
        &backend,
        &[json!({ "type": "done", "text": "Paris." })],
        None,
    )
    .await;
    let t = boot(backend).await;

    let mut a = connect(&t.ws).await;
    let mut b = connect(&t.ws).await;
    join(&mut a, "shared").await;
    join(&mut b, "shared").await;

    send(&mut a, json!({ "type": "user_message", "sessionId": "shared", "message": "q" })).await;

    for ws in [&mut a, &mut b] {
        let events = collect_turn(ws).await;
        assert_eq!(events.last().unwrap()["data"]["answer"], "Paris.");
    }
}

#[tokio::test]
async fn blocking_chat_over_http() {
    let backend = MockServer::start().await;
    mount_retrieval(&backend, 200, paris_snippets()).await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "answer": "Paris." })))
        .mount(&backend)
        .await;
    let t = boot(backend).await;

    let client = reqwest::Client::new();
    let created: Value = client
        .post(format!("{}/session", t.http))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["sessionId"].as_str().unwrap().to_string();

    let reply: Value = client
        .post(format!("{}/chat/{id}", t.http))
        .json(&json!({ "message": "capital?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["answer"], "Paris.");
    assert_eq!(reply["contexts"].as_array().unwrap().len(), 1);
    assert_eq!(history(&t.http, &id).await.len(), 2);
}

#[tokio::test]
async fn blocking_chat_upstream_failure_is_bad_gateway() {
    let backend = MockServer::start().await;
    mount_retrieval(&backend, 200, paris_snippets()).await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&backend)
        .await;
    let t = boot(backend).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat/s-502", t.http))
        .json(&json!({ "message": "capital?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 502);
    assert_eq!(history(&t.http, "s-502").await.len(), 1);
}
