//! Full-duplex streaming session over a message-oriented transport.
//!
//! A session owns one connection and two background tasks:
//!
//! ```text
//! ┌──────────────┐   push    ┌────────────────┐   send    ┌─────────────┐
//! │ send_audio() │──────────▶│ OutboundQueue  │──────────▶│             │
//! │ stop()       │           │ (FIFO, sealed  │  sender   │  Transport  │
//! │ close()      │           │  on close)     │   loop    │             │
//! └──────────────┘           └────────────────┘           │             │
//!                                                         │             │
//! ┌──────────────┐  publish  ┌────────────────┐  receive  │             │
//! │  observers   │◀──────────│  Reassembler + │◀──────────│             │
//! │              │           │  decoder       │ receiver  │             │
//! └──────────────┘           └────────────────┘   loop    └─────────────┘
//! ```
//!
//! Callers never touch the network directly: writes are queued and return
//! immediately, results arrive through observers, and [`StreamSession::close`]
//! runs a bounded graceful shutdown.

mod error;
mod inbound;
mod lifecycle;
mod outbound;
mod transport;
mod websocket;

#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

pub use error::{SessionError, SessionResult};
pub use inbound::{
    EventObserver, InboundMessage, JsonDecoder, MessageDecoder, Observers, Reassembler,
    SessionEvent, Termination, channel_observer,
};
pub use lifecycle::{
    DEFAULT_MAX_MESSAGE_SIZE, SessionBuilder, SessionConfig, SessionEndpoint, SessionState,
    StreamSession,
};
pub use outbound::{OutboundQueue, OutboundReceiver, QUEUE_HIGH_WATER_MARK, SenderExit, run_sender};
pub use transport::{
    CloseCode, CloseReason, Connector, FrameKind, InboundFrame, OutboundFrame, Received,
    Transport, TransportError, TransportState,
};
pub use websocket::{WebSocketConnector, WebSocketTransport};
