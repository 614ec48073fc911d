//! In-memory transport used by the session unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::transport::{
    CloseReason, Connector, FrameKind, InboundFrame, OutboundFrame, Received, Transport,
    TransportError, TransportState,
};

/// Transport whose peer is driven by the test.
///
/// Outbound frames are recorded. Inbound frames are fed through
/// [`ScriptedTransport::push_text`] and friends. By default a local close is
/// acknowledged by the peer, which ends the receive side.
pub struct ScriptedTransport {
    sent: Mutex<Vec<OutboundFrame>>,
    closes: Mutex<Vec<CloseReason>>,
    state: Mutex<TransportState>,
    inbound_tx: mpsc::UnboundedSender<Result<Received, TransportError>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Received, TransportError>>>,
    send_delay: Mutex<Duration>,
    fail_after: Mutex<Option<usize>>,
    send_calls: AtomicUsize,
    stall_sends: AtomicBool,
    ack_close: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            state: Mutex::new(TransportState::Open),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            send_delay: Mutex::new(Duration::ZERO),
            fail_after: Mutex::new(None),
            send_calls: AtomicUsize::new(0),
            stall_sends: AtomicBool::new(false),
            ack_close: AtomicBool::new(true),
        })
    }

    /// Frames successfully written, in order.
    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.sent.lock().clone()
    }

    /// Close handshakes issued by the session.
    pub fn closes(&self) -> Vec<CloseReason> {
        self.closes.lock().clone()
    }

    /// Let the first `n` sends succeed and fail every later one.
    pub fn fail_sends_after(&self, n: usize) {
        *self.fail_after.lock() = Some(n);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }

    /// Make every send hang forever.
    pub fn stall_sends(&self) {
        self.stall_sends.store(true, Ordering::SeqCst);
    }

    /// Peer never answers a close handshake.
    pub fn ignore_close(&self) {
        self.ack_close.store(false, Ordering::SeqCst);
    }

    pub fn push_frame(&self, kind: FrameKind, payload: impl Into<Bytes>, is_final: bool) {
        let _ = self.inbound_tx.send(Ok(Received::Frame(InboundFrame {
            kind,
            payload: payload.into(),
            is_final,
        })));
    }

    pub fn push_text(&self, text: &str) {
        self.push_frame(FrameKind::Text, Bytes::copy_from_slice(text.as_bytes()), true);
    }

    /// Peer-initiated close.
    pub fn push_close(&self, reason: Option<CloseReason>) {
        let _ = self.inbound_tx.send(Ok(Received::Close(reason)));
    }

    pub fn push_error(&self, error: TransportError) {
        let _ = self.inbound_tx.send(Err(error));
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let call = self.send_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_after.lock() {
            if call >= limit {
                return Err(TransportError::Send("connection reset".to_string()));
            }
        }

        self.sent.lock().push(frame);
        Ok(())
    }

    async fn receive(&self) -> Result<Received, TransportError> {
        let next = self.inbound_rx.lock().await.recv().await;
        match next {
            Some(Ok(Received::Close(reason))) => {
                *self.state.lock() = TransportState::Closed;
                Ok(Received::Close(reason))
            }
            Some(other) => other,
            None => Err(TransportError::Closed),
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
        self.closes.lock().push(reason.clone());
        if self.ack_close.load(Ordering::SeqCst) {
            self.push_close(Some(reason));
        }
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }
}

/// Shares one scripted transport with the session under test.
struct SharedTransport(Arc<ScriptedTransport>);

#[async_trait]
impl Transport for SharedTransport {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.0.send(frame).await
    }

    async fn receive(&self) -> Result<Received, TransportError> {
        self.0.receive().await
    }

    async fn close(&self, reason: CloseReason) -> Result<(), TransportError> {
        self.0.close(reason).await
    }

    fn state(&self) -> TransportState {
        self.0.state()
    }
}

/// Connector handing out a prepared [`ScriptedTransport`].
pub struct ScriptedConnector {
    transport: Arc<ScriptedTransport>,
    reject: Mutex<Option<u16>>,
    requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedConnector {
    pub fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self {
            transport,
            reject: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail the handshake with the given HTTP status.
    pub fn reject_with(&self, status: u16) {
        *self.reject.lock() = Some(status);
    }

    /// URL and headers of every open attempt.
    pub fn requests(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.requests.lock().push((url.to_string(), headers.to_vec()));
        if let Some(status) = *self.reject.lock() {
            return Err(TransportError::Rejected {
                status,
                message: "Unauthorized".to_string(),
            });
        }
        Ok(Box::new(SharedTransport(self.transport.clone())))
    }
}
