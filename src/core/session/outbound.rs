//! Outbound queue and sender loop.
//!
//! Producers (the caller's audio writes and lifecycle control messages) push
//! frames into an unbounded FIFO. A single sender task drains it and writes
//! each frame to the transport, awaiting every write before taking the next
//! one.
//!
//! The queue is sealed when the session starts stopping: an optional final
//! frame (the terminal control message) is appended and the producer side is
//! dropped under the same lock, so no late write can land behind it. The
//! sender then flushes whatever is left and exits when the channel reports
//! end-of-stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::transport::{OutboundFrame, Transport, TransportError};

/// Pending-frame count above which a warning is logged. The queue keeps
/// accepting frames; the warning points at a producer outrunning the link.
pub const QUEUE_HIGH_WATER_MARK: usize = 512;

// =============================================================================
// Queue
// =============================================================================

/// Producer side of the outbound queue.
pub struct OutboundQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    pending: Arc<AtomicUsize>,
    high_water_logged: AtomicBool,
}

/// Consumer side of the outbound queue, owned by the sender loop.
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
    pending: Arc<AtomicUsize>,
}

impl OutboundQueue {
    /// Create a connected queue/receiver pair.
    pub fn new() -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx: Mutex::new(Some(tx)),
                pending: pending.clone(),
                high_water_logged: AtomicBool::new(false),
            },
            OutboundReceiver { rx, pending },
        )
    }

    /// Append a frame to the tail of the queue.
    ///
    /// Never blocks. Returns the frame back if the queue has been sealed or
    /// the sender loop is gone.
    pub fn push(&self, frame: OutboundFrame) -> Result<(), OutboundFrame> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(frame);
        };

        self.pending.fetch_add(1, Ordering::AcqRel);
        match tx.send(frame) {
            Ok(()) => {
                self.check_high_water();
                Ok(())
            }
            Err(mpsc::error::SendError(frame)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(frame)
            }
        }
    }

    /// Append `last` (if any) and close the queue to further frames.
    ///
    /// Returns `false` if the queue was already sealed, in which case `last`
    /// is discarded.
    pub fn seal(&self, last: Option<OutboundFrame>) -> bool {
        let mut guard = self.tx.lock();
        let Some(tx) = guard.take() else {
            return false;
        };

        if let Some(frame) = last {
            self.pending.fetch_add(1, Ordering::AcqRel);
            if tx.send(frame).is_err() {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                debug!("Sender loop already gone; final frame dropped");
            }
        }
        true
    }

    pub fn is_sealed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Number of frames enqueued but not yet handed to the transport.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn check_high_water(&self) {
        let depth = self.pending();
        if depth >= QUEUE_HIGH_WATER_MARK {
            if !self.high_water_logged.swap(true, Ordering::AcqRel) {
                warn!(
                    "Outbound queue depth {} exceeds high-water mark {}",
                    depth, QUEUE_HIGH_WATER_MARK
                );
            }
        } else if depth < QUEUE_HIGH_WATER_MARK / 2 {
            self.high_water_logged.store(false, Ordering::Release);
        }
    }
}

impl OutboundReceiver {
    async fn recv(&mut self) -> Option<OutboundFrame> {
        let frame = self.rx.recv().await;
        if frame.is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        frame
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

// =============================================================================
// Sender loop
// =============================================================================

/// How the sender loop ended.
#[derive(Debug)]
pub enum SenderExit {
    /// The queue was sealed and fully flushed.
    Drained { sent: u64 },
    /// Cancelled before the queue emptied.
    Cancelled { sent: u64, pending: usize },
    /// A transmit failed. Not retried.
    Failed { sent: u64, error: TransportError },
}

impl SenderExit {
    pub fn sent(&self) -> u64 {
        match self {
            SenderExit::Drained { sent }
            | SenderExit::Cancelled { sent, .. }
            | SenderExit::Failed { sent, .. } => *sent,
        }
    }
}

/// Drain `queue` into `transport` in FIFO order until the queue is sealed
/// and empty, a write fails, or `cancel` fires.
///
/// Cancellation is only observed between frames: a write that has already
/// started is allowed to finish.
pub async fn run_sender(
    transport: Arc<dyn Transport>,
    mut queue: OutboundReceiver,
    cancel: CancellationToken,
) -> SenderExit {
    let mut sent: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let pending = queue.pending();
                debug!("Sender loop cancelled with {} frame(s) pending", pending);
                return SenderExit::Cancelled { sent, pending };
            }

            frame = queue.recv() => frame,
        };

        let Some(frame) = next else {
            debug!("Outbound queue drained after {} frame(s)", sent);
            return SenderExit::Drained { sent };
        };

        let kind = frame.kind;
        let len = frame.len();
        if let Err(error) = transport.send(frame).await {
            error!("Failed to send {} frame ({} bytes): {}", kind, len, error);
            return SenderExit::Failed { sent, error };
        }
        sent += 1;
    }
}
