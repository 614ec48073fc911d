//! Inbound reassembly, decoding and dispatch.
//!
//! The receiver loop is the only reader of the transport. Raw frames are
//! appended to a bounded buffer until one carries the end-of-message marker;
//! the buffer is then decoded and the result is published to every
//! registered observer.
//!
//! # Observer contract
//!
//! Observers are invoked synchronously on the receiver task, in
//! registration order, once per event. They must not block: reception of
//! the next frame waits until every observer has returned. Observers that
//! need to do real work should forward the event to a channel (see
//! [`channel_observer`]) and process it elsewhere.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::error::SessionError;
use super::lifecycle::{SessionShared, SessionState};
use super::transport::{
    CloseReason, FrameKind, InboundFrame, Received, Transport, TransportError,
};

/// Initial capacity of the reassembly buffer; it grows up to the configured
/// maximum message size.
const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

// =============================================================================
// Messages
// =============================================================================

/// A complete logical message, possibly assembled from several frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl InboundMessage {
    /// View the payload as UTF-8.
    pub fn as_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

// =============================================================================
// Reassembler
// =============================================================================

/// Accumulates fragments of a single logical message.
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    kind: Option<FrameKind>,
    fragments: usize,
    max_message_size: usize,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY.min(max_message_size)),
            kind: None,
            fragments: 0,
            max_message_size,
        }
    }

    /// Append a raw frame.
    ///
    /// Returns the complete message when `frame` carries the end-of-message
    /// marker, `None` while more fragments are expected. If the cumulative
    /// size would exceed the maximum the partial message is discarded and
    /// [`SessionError::PayloadTooLarge`] is returned.
    pub fn push(&mut self, frame: InboundFrame) -> Result<Option<InboundMessage>, SessionError> {
        let size = self.buffer.len() + frame.payload.len();
        if size > self.max_message_size {
            self.reset();
            return Err(SessionError::PayloadTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        // Continuation frames inherit the kind of the first fragment
        let kind = *self.kind.get_or_insert(frame.kind);
        self.fragments += 1;

        if !frame.is_final {
            self.buffer.extend_from_slice(&frame.payload);
            return Ok(None);
        }

        let payload = if self.fragments == 1 {
            // Single-frame message, no copy needed
            frame.payload
        } else {
            self.buffer.extend_from_slice(&frame.payload);
            self.buffer.split().freeze()
        };

        self.kind = None;
        self.fragments = 0;
        Ok(Some(InboundMessage { kind, payload }))
    }

    /// Bytes buffered for the message in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_idle(&self) -> bool {
        self.fragments == 0
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.kind = None;
        self.fragments = 0;
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Turns a complete inbound message into the application result type.
pub trait MessageDecoder: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Decode one message. Failures are reported to observers and do not end
    /// the session.
    fn decode(&self, message: &InboundMessage) -> Result<Self::Output, SessionError>;
}

/// Decodes JSON payloads into `T`.
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageDecoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Output = T;

    fn decode(&self, message: &InboundMessage) -> Result<T, SessionError> {
        serde_json::from_slice(&message.payload).map_err(|e| SessionError::Decode(e.to_string()))
    }
}

// =============================================================================
// Events & observers
// =============================================================================

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Local close handshake completed.
    Normal,
    /// The peer closed the connection without being asked to.
    RemoteClosed(Option<CloseReason>),
    /// An inbound message exceeded the size limit.
    PayloadTooLarge { size: usize, max: usize },
    /// Transmitting a frame failed.
    SendFailed(String),
    /// Reading from the transport failed.
    ReceiveFailed(String),
    /// Shutdown timed out and the loops were cancelled.
    Cancelled,
}

impl Termination {
    /// Whether the session ended because of a failure rather than a
    /// requested shutdown.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Termination::Normal | Termination::Cancelled)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Normal => write!(f, "closed normally"),
            Termination::RemoteClosed(Some(reason)) => write!(f, "closed by peer: {reason}"),
            Termination::RemoteClosed(None) => write!(f, "closed by peer"),
            Termination::PayloadTooLarge { size, max } => {
                write!(f, "payload too large ({size} > {max} bytes)")
            }
            Termination::SendFailed(e) => write!(f, "send failed: {e}"),
            Termination::ReceiveFailed(e) => write!(f, "receive failed: {e}"),
            Termination::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Event published by the receiver loop.
#[derive(Debug, Clone)]
pub enum SessionEvent<T> {
    /// A decoded application message.
    Message(T),
    /// A complete message that could not be decoded.
    DecodeFailed { error: String, raw: InboundMessage },
    /// Terminal notification; always the last event of a session.
    Closed(Termination),
}

/// Callback invoked inline on the receiver task.
pub type EventObserver<T> = Arc<dyn Fn(&SessionEvent<T>) + Send + Sync>;

/// Registered observers, shared between the session handle and the
/// receiver loop.
pub struct Observers<T> {
    inner: Arc<RwLock<Vec<EventObserver<T>>>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<T> Observers<T> {
    pub fn new(initial: Vec<EventObserver<T>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn add(&self, observer: EventObserver<T>) {
        self.inner.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Invoke every observer with `event`. The list is snapshotted first so
    /// no lock is held while observers run.
    pub fn publish(&self, event: &SessionEvent<T>) {
        let snapshot: Vec<EventObserver<T>> = self.inner.read().clone();
        for observer in &snapshot {
            observer(event);
        }
    }
}

/// Observer that forwards every event into an unbounded channel, moving
/// processing off the receiver task.
pub fn channel_observer<T>(tx: mpsc::UnboundedSender<SessionEvent<T>>) -> EventObserver<T>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move |event: &SessionEvent<T>| {
        if tx.send(event.clone()).is_err() {
            debug!("Event channel closed; dropping session event");
        }
    })
}

// =============================================================================
// Receiver loop
// =============================================================================

/// Read, reassemble, decode and publish until the transport closes, a
/// fatal error occurs or the session is cancelled.
///
/// Publishes exactly one [`SessionEvent::Closed`] before returning.
pub(crate) async fn run_receiver<D: MessageDecoder>(
    transport: Arc<dyn Transport>,
    decoder: Arc<D>,
    observers: Observers<D::Output>,
    shared: Arc<SessionShared>,
    max_message_size: usize,
    close_timeout: Duration,
) -> Termination {
    let mut reassembler = Reassembler::new(max_message_size);
    let mut dispatched: u64 = 0;

    let termination = loop {
        if !transport.state().is_readable() {
            break closed_termination(&shared, None);
        }

        let received = tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => {
                break shared.termination().unwrap_or(Termination::Cancelled);
            }

            received = transport.receive() => received,
        };

        match received {
            Ok(Received::Frame(frame)) => match reassembler.push(frame) {
                Ok(Some(message)) => {
                    dispatched += 1;
                    dispatch(decoder.as_ref(), &observers, message);
                }
                Ok(None) => {}
                Err(SessionError::PayloadTooLarge { size, max }) => {
                    break abort_oversize(transport.as_ref(), size, max, close_timeout).await;
                }
                Err(e) => {
                    break Termination::ReceiveFailed(e.to_string());
                }
            },

            Ok(Received::Close(reason)) => {
                debug!("Received close frame: {:?}", reason);
                break closed_termination(&shared, reason);
            }

            Err(TransportError::PayloadTooLarge { size, max }) => {
                break abort_oversize(transport.as_ref(), size, max, close_timeout).await;
            }

            Err(TransportError::Closed) => {
                break closed_termination(&shared, None);
            }

            Err(e) => {
                error!("Receive failed: {}", e);
                break Termination::ReceiveFailed(e.to_string());
            }
        }
    };

    if !reassembler.is_idle() {
        warn!(
            "Receiver exiting with {} bytes of an incomplete message",
            reassembler.buffered()
        );
    }

    if termination.is_failure() {
        shared.fail(termination.clone());
    }

    info!(
        "Receiver loop finished after {} message(s): {}",
        dispatched, termination
    );
    observers.publish(&SessionEvent::Closed(termination.clone()));
    termination
}

fn dispatch<D: MessageDecoder>(
    decoder: &D,
    observers: &Observers<D::Output>,
    message: InboundMessage,
) {
    match decoder.decode(&message) {
        Ok(decoded) => observers.publish(&SessionEvent::Message(decoded)),
        Err(e) => {
            warn!("Failed to decode {} message: {}", message.kind, e);
            observers.publish(&SessionEvent::DecodeFailed {
                error: e.to_string(),
                raw: message,
            });
        }
    }
}

/// A close observed while the session is stopping is the acknowledgement of
/// our own handshake; otherwise the peer went away on its own.
fn closed_termination(shared: &SessionShared, reason: Option<CloseReason>) -> Termination {
    if let Some(failure) = shared.termination() {
        return failure;
    }
    if shared.state() >= SessionState::Stopping {
        Termination::Normal
    } else {
        Termination::RemoteClosed(reason)
    }
}

async fn abort_oversize(
    transport: &dyn Transport,
    size: usize,
    max: usize,
    close_timeout: Duration,
) -> Termination {
    error!(
        "Inbound message exceeds maximum size ({} > {} bytes); closing",
        size, max
    );
    match timeout(close_timeout, transport.close(CloseReason::payload_too_large())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Abnormal close failed: {}", e),
        Err(_) => warn!("Abnormal close timed out after {:?}", close_timeout),
    }
    Termination::PayloadTooLarge { size, max }
}
