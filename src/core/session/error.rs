//! Session error types.

use thiserror::Error;

use super::lifecycle::SessionState;
use super::transport::TransportError;
use crate::auth::AuthError;

/// Errors produced by the streaming session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be established. The session never reached
    /// `Streaming`.
    #[error("Connection error: {0}")]
    Connection(#[source] TransportError),

    /// The credential provider failed to produce a token.
    #[error("Credential error: {0}")]
    Credential(#[from] AuthError),

    /// A frame could not be transmitted mid-stream.
    #[error("Send error: {0}")]
    Send(#[source] TransportError),

    /// The receive side failed.
    #[error("Receive error: {0}")]
    Receive(#[source] TransportError),

    /// An inbound message exceeded the configured maximum.
    #[error("Inbound message exceeds maximum size of {max} bytes (got at least {size})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An inbound message could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A control message could not be serialized.
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The frame was rejected because the session no longer accepts writes.
    #[error("Session is not streaming (state: {0})")]
    NotStreaming(SessionState),
}

pub type SessionResult<T> = Result<T, SessionError>;
