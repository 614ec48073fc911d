//! WebSocket mock of the Watson `/v1/recognize` endpoint.
//!
//! Speaks the service's half of the protocol closely enough for end-to-end
//! tests:
//! - rejects the handshake unless the expected bearer token is present
//! - answers each `start` with `{"state":"listening"}`
//! - counts binary audio per request
//! - on `stop`, sends a final result describing the audio it saw and a new
//!   `listening` notice
//!
//! Behaviors can be switched on to simulate misbehaving servers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// How the mock should misbehave.
#[derive(Clone, Debug, Default)]
pub struct MockBehavior {
    /// Token expected in `Authorization: Bearer <token>`. `None` accepts any.
    pub expected_token: Option<String>,
    /// Send an interim hypothesis after the first audio chunk of a request.
    pub interim: bool,
    /// Reply to `start` with a text message of this many bytes.
    pub oversize_reply: Option<usize>,
    /// Close with 1011 after this many audio chunks, then wait for the reply.
    pub close_after_chunks: Option<u64>,
    /// Send a service error instead of results on `stop`.
    pub error_on_stop: Option<String>,
}

/// Handshake details captured for assertions.
#[derive(Clone, Debug)]
pub struct RecordedHandshake {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Default)]
pub struct MockState {
    pub handshakes: Mutex<Vec<RecordedHandshake>>,
    pub control_messages: Mutex<Vec<Value>>,
    pub audio_bytes: AtomicU64,
    pub audio_chunks: AtomicU64,
    pub connections: AtomicU64,
    pub client_closed: AtomicU64,
    /// Codes of close frames received from the client, in order.
    pub close_codes: Mutex<Vec<u16>>,
}

/// A running mock server bound to an ephemeral loopback port.
pub struct MockWatsonServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockWatsonServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, behavior).await {
                        eprintln!("mock watson connection error: {e}");
                    }
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Loopback URL of the recognize endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}/v1/recognize", self.addr)
    }

    pub fn handshakes(&self) -> Vec<RecordedHandshake> {
        self.state.handshakes.lock().clone()
    }

    pub fn control_messages(&self) -> Vec<Value> {
        self.state.control_messages.lock().clone()
    }

    pub fn audio_bytes(&self) -> u64 {
        self.state.audio_bytes.load(Ordering::SeqCst)
    }

    pub fn close_codes(&self) -> Vec<u16> {
        self.state.close_codes.lock().clone()
    }
}

impl Drop for MockWatsonServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockState>,
    behavior: MockBehavior,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let expected = behavior
        .expected_token
        .as_ref()
        .map(|token| format!("Bearer {token}"));
    let handshake_state = state.clone();

    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let authorization = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        handshake_state.handshakes.lock().push(RecordedHandshake {
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            authorization: authorization.clone(),
        });

        match &expected {
            Some(expected) if authorization.as_deref() != Some(expected.as_str()) => {
                let mut rejection = ErrorResponse::new(Some("Unauthorized".to_string()));
                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                Err(rejection)
            }
            _ => Ok(response),
        }
    };

    let ws_stream = accept_hdr_async(stream, callback).await?;
    let (mut write, mut read) = ws_stream.split();
    state.connections.fetch_add(1, Ordering::SeqCst);

    let mut request_bytes = 0u64;
    let mut request_chunks = 0u64;
    let mut result_index = 0u32;

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                let control: Value = serde_json::from_str(text.as_str())?;
                state.control_messages.lock().push(control.clone());

                match control.get("action").and_then(Value::as_str) {
                    Some("start") => {
                        request_bytes = 0;
                        request_chunks = 0;
                        if let Some(size) = behavior.oversize_reply {
                            let padding = "x".repeat(size);
                            let reply = json!({ "state": "listening", "padding": padding });
                            write.send(Message::Text(reply.to_string().into())).await?;
                        } else {
                            write.send(listening()).await?;
                        }
                    }
                    Some("stop") => {
                        if let Some(error) = &behavior.error_on_stop {
                            let reply = json!({ "error": error, "code": 400 });
                            write.send(Message::Text(reply.to_string().into())).await?;
                            continue;
                        }
                        let transcript = format!("received {request_bytes} bytes in {request_chunks} chunks");
                        write
                            .send(results(result_index, &transcript, true))
                            .await?;
                        result_index += 1;
                        write.send(listening()).await?;
                    }
                    _ => {
                        let reply = json!({ "error": "Unrecognized action" });
                        write.send(Message::Text(reply.to_string().into())).await?;
                    }
                }
            }
            Message::Binary(data) => {
                request_bytes += data.len() as u64;
                request_chunks += 1;
                state.audio_bytes.fetch_add(data.len() as u64, Ordering::SeqCst);
                let total = state.audio_chunks.fetch_add(1, Ordering::SeqCst) + 1;

                if behavior.interim && request_chunks == 1 {
                    write
                        .send(results(result_index, "partial hypothesis", false))
                        .await?;
                }

                if behavior.close_after_chunks == Some(total) {
                    let frame = CloseFrame {
                        code: CloseCode::Error,
                        reason: "internal failure".into(),
                    };
                    // Keep reading: the client's reply completes the handshake.
                    write.send(Message::Close(Some(frame))).await?;
                }
            }
            Message::Close(frame) => {
                state.client_closed.fetch_add(1, Ordering::SeqCst);
                if let Some(frame) = frame {
                    state.close_codes.lock().push(u16::from(frame.code));
                }
                // tungstenite queues the close reply; flushing sends it.
                let _ = write.flush().await;
            }
            Message::Ping(data) => {
                write.send(Message::Pong(data)).await?;
            }
            _ => {}
        }
    }

    Ok(())
}

fn listening() -> Message {
    Message::Text(json!({ "state": "listening" }).to_string().into())
}

fn results(result_index: u32, transcript: &str, is_final: bool) -> Message {
    let body = json!({
        "result_index": result_index,
        "results": [{
            "final": is_final,
            "alternatives": [{
                "transcript": transcript,
                "confidence": 0.91
            }]
        }]
    });
    Message::Text(body.to_string().into())
}
