//! Transport abstraction consumed by the streaming session.
//!
//! The session never talks to a socket directly. It opens a [`Transport`]
//! through a [`Connector`] and then drives it from exactly two tasks: the
//! sender loop (the only writer of data frames) and the receiver loop (the
//! only reader). Implementations must tolerate one in-flight `send` running
//! concurrently with one in-flight `receive`, and must serialize `close`
//! with `send` on the write side.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Frames
// =============================================================================

/// Kind tag carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// UTF-8 text payload (control messages, JSON results).
    Text,
    /// Opaque binary payload (audio).
    Binary,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Text => write!(f, "text"),
            FrameKind::Binary => write!(f, "binary"),
        }
    }
}

/// A unit of data queued for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Build a text frame.
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Text,
            payload: Bytes::from(payload.into()),
        }
    }

    /// Build a binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Binary,
            payload: payload.into(),
        }
    }

    /// Serialize `value` as JSON into a text frame.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Self::text)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A raw frame read from the transport.
///
/// `is_final` is the end-of-message marker: a logical message may span
/// several consecutive frames, only the last of which is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub kind: FrameKind,
    pub payload: Bytes,
    pub is_final: bool,
}

/// Outcome of a single `receive` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A data frame (possibly a fragment).
    Frame(InboundFrame),
    /// The peer sent a close frame.
    Close(Option<CloseReason>),
}

// =============================================================================
// Close handshake
// =============================================================================

/// Close status codes the session issues or observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000, orderly shutdown.
    Normal,
    /// 1001, endpoint going away.
    Away,
    /// 1007, payload inconsistent with the message type.
    InvalidPayload,
    /// 1009, message too big to process.
    PayloadTooLarge,
    /// 1011, unexpected condition on the peer.
    InternalError,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PayloadTooLarge => 1009,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1007 => CloseCode::InvalidPayload,
            1009 => CloseCode::PayloadTooLarge,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }
}

/// Close code plus human readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Graceful close issued by `StreamSession::close`.
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "Close")
    }

    /// Abnormal close issued when an inbound message exceeds the limit.
    pub fn payload_too_large() -> Self {
        Self::new(CloseCode::PayloadTooLarge, "payload too large")
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.code.as_u16())
    }
}

// =============================================================================
// State & errors
// =============================================================================

/// Connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Open,
    /// Local close handshake sent, peer acknowledgement pending.
    CloseSent,
    Closed,
}

impl TransportState {
    /// States in which inbound frames can still arrive.
    pub fn is_readable(self) -> bool {
        matches!(self, TransportState::Open | TransportState::CloseSent)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Connecting => write!(f, "Connecting"),
            TransportState::Open => write!(f, "Open"),
            TransportState::CloseSent => write!(f, "CloseSent"),
            TransportState::Closed => write!(f, "Closed"),
        }
    }
}

/// Errors surfaced by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The handshake could not be completed.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The handshake was refused because of the credential.
    #[error("Handshake rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Writing a frame failed.
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// The transport enforced its own message size limit.
    #[error("Inbound message of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// The operation requires an open connection.
    #[error("Transport is closed")]
    Closed,
}

// =============================================================================
// Traits
// =============================================================================

/// An open, message-oriented duplex connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit one complete frame. Never called concurrently with itself.
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError>;

    /// Wait for the next raw frame. Never called concurrently with itself.
    async fn receive(&self) -> Result<Received, TransportError>;

    /// Issue a close handshake. The receive side keeps delivering frames
    /// until the peer acknowledges.
    async fn close(&self, reason: CloseReason) -> Result<(), TransportError>;

    /// Current connection state.
    fn state(&self) -> TransportState;
}

/// Factory that opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<Box<dyn Transport>, TransportError>;
}
