//! WebSocket transport built on tokio-tungstenite.
//!
//! The stream is split once at connect time. The write half and the read
//! half each sit behind their own async mutex, so a send and a receive can
//! be in flight together while `close` queues up behind any in-flight send.
//! These two locks are the only locks held across I/O in the crate.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, trace};

use super::lifecycle::DEFAULT_MAX_MESSAGE_SIZE;
use super::transport::{
    CloseCode, CloseReason, Connector, FrameKind, InboundFrame, OutboundFrame, Received,
    Transport, TransportError, TransportState,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Connector
// =============================================================================

/// Opens WebSocket connections (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    max_message_size: usize,
    disable_nagle: bool,
}

impl WebSocketConnector {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            disable_nagle: true,
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("Invalid WebSocket URL: {e}")))?;

        for (key, value) in headers {
            let name = key
                .parse::<HeaderName>()
                .map_err(|e| TransportError::Connect(format!("Invalid header name {key}: {e}")))?;
            let value = value
                .parse::<HeaderValue>()
                .map_err(|_| TransportError::Connect(format!("Invalid value for header {key}")))?;
            request.headers_mut().insert(name, value);
        }

        let config = WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size));

        let (stream, response) = connect_async_with_config(request, Some(config), self.disable_nagle)
            .await
            .map_err(map_connect_error)?;
        debug!("WebSocket handshake completed ({})", response.status());

        Ok(Box::new(WebSocketTransport::new(stream)))
    }
}

fn map_connect_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let message = response
                .body()
                .as_ref()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .filter(|body| !body.is_empty())
                .unwrap_or_else(|| {
                    response
                        .status()
                        .canonical_reason()
                        .unwrap_or("handshake rejected")
                        .to_string()
                });
            TransportError::Rejected { status, message }
        }
        other => TransportError::Connect(other.to_string()),
    }
}

// =============================================================================
// Transport
// =============================================================================

/// An open WebSocket connection.
pub struct WebSocketTransport {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    stream: tokio::sync::Mutex<SplitStream<WsStream>>,
    state: Mutex<TransportState>,
}

impl WebSocketTransport {
    pub fn new(stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink: tokio::sync::Mutex::new(sink),
            stream: tokio::sync::Mutex::new(stream),
            state: Mutex::new(TransportState::Open),
        }
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
    }

    /// tungstenite queues the reply to a peer's close frame and writes it on
    /// the next poll of the write half. An in-flight send flushes it too, so
    /// only flush when the sink is free.
    async fn flush_close_reply(&self) {
        let Ok(mut sink) = self.sink.try_lock() else {
            return;
        };
        match sink.flush().await {
            Ok(()) => debug!("Close reply sent"),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                debug!("Close reply sent; connection closed")
            }
            Err(e) => debug!("Close reply not sent: {}", e),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if self.state() != TransportState::Open {
            return Err(TransportError::Closed);
        }

        let message = match frame.kind {
            FrameKind::Binary => Message::Binary(frame.payload),
            FrameKind::Text => Message::Text(
                Utf8Bytes::try_from(frame.payload)
                    .map_err(|e| TransportError::Send(format!("Text frame is not UTF-8: {e}")))?,
            ),
        };

        let mut sink = self.sink.lock().await;
        sink.send(message).await.map_err(|e| match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            other => TransportError::Send(other.to_string()),
        })
    }

    async fn receive(&self) -> Result<Received, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            let Some(next) = stream.next().await else {
                self.set_state(TransportState::Closed);
                return Err(TransportError::Closed);
            };

            match next {
                Ok(Message::Text(text)) => {
                    return Ok(Received::Frame(InboundFrame {
                        kind: FrameKind::Text,
                        payload: text.into(),
                        is_final: true,
                    }));
                }
                Ok(Message::Binary(data)) => {
                    return Ok(Received::Frame(InboundFrame {
                        kind: FrameKind::Binary,
                        payload: data,
                        is_final: true,
                    }));
                }
                Ok(Message::Close(frame)) => {
                    let peer_initiated = self.state() == TransportState::Open;
                    self.set_state(TransportState::Closed);
                    if peer_initiated {
                        self.flush_close_reply().await;
                    }
                    let reason = frame.map(|f| {
                        CloseReason::new(CloseCode::from_u16(u16::from(f.code)), f.reason.as_str())
                    });
                    return Ok(Received::Close(reason));
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    trace!("Control frame");
                }
                Ok(Message::Frame(_)) => {}
                Err(tungstenite::Error::Capacity(CapacityError::MessageTooLong {
                    size,
                    max_size,
                })) => {
                    return Err(TransportError::PayloadTooLarge {
                        size,
                        max: max_size,
                    });
                }
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    self.set_state(TransportState::Closed);
                    return Err(TransportError::Closed);
                }
                Err(e) => {
                    self.set_state(TransportState::Closed);
                    return Err(TransportError::Receive(e.to_string()));
                }
            }
        }
    }

    async fn close(&self, reason: CloseReason) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            if *state != TransportState::Open {
                return Err(TransportError::Closed);
            }
            *state = TransportState::CloseSent;
        }

        let frame = CloseFrame {
            code: WsCloseCode::from(reason.code.as_u16()),
            reason: reason.reason.into(),
        };
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }
}
