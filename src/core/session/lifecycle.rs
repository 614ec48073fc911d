//! Session lifecycle: connect, stream, stop, close.
//!
//! ```text
//! Connecting ──▶ Streaming ──▶ Stopping ──▶ Closed
//!      │              │                       ▲
//!      └── (error) ───┴──── (fatal error) ────┘
//! ```
//!
//! States only move forward. `Closed` is terminal; a new connection needs a
//! new session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use super::error::{SessionError, SessionResult};
use super::inbound::{EventObserver, MessageDecoder, Observers, Termination, run_receiver};
use super::outbound::{OutboundQueue, OutboundReceiver, SenderExit, run_sender};
use super::transport::{CloseReason, Connector, OutboundFrame, Transport, TransportError, TransportState};
use crate::auth::{CredentialProvider, bearer};

/// Default maximum size of one reassembled inbound message (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Grace period for a cancelled receiver before it is aborted.
const ABORT_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a [`StreamSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Handshake in progress.
    Connecting,
    /// Transport open; writes accepted.
    Streaming,
    /// Close requested; draining and waiting for the peer.
    Stopping,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Streaming => write!(f, "Streaming"),
            SessionState::Stopping => write!(f, "Stopping"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Timeouts and limits applied to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum reassembled inbound message size in bytes.
    pub max_message_size: usize,
    /// Bound on the handshake.
    pub connect_timeout: Duration,
    /// How long `close` waits for the outbound queue to flush.
    pub drain_timeout: Duration,
    /// Bound on issuing the close handshake.
    pub close_timeout: Duration,
    /// How long `close` waits for the receiver loop to exit.
    pub receiver_exit_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connect_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            receiver_exit_timeout: Duration::from_secs(30),
        }
    }
}

/// Where to connect and which control messages bracket a request.
#[derive(Debug, Clone)]
pub struct SessionEndpoint {
    pub url: String,
    /// Enqueued before any caller write; opens the first request.
    pub initial_control: OutboundFrame,
    /// Enqueued by `stop` and by `close` while a request is open.
    pub terminal_control: OutboundFrame,
}

// =============================================================================
// Shared state
// =============================================================================

/// State shared between the session handle and its two loops.
pub(crate) struct SessionShared {
    state: watch::Sender<SessionState>,
    pub(crate) queue: OutboundQueue,
    pub(crate) cancel: CancellationToken,
    termination: Mutex<Option<Termination>>,
}

impl SessionShared {
    fn new(queue: OutboundQueue) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            state,
            queue,
            cancel: CancellationToken::new(),
            termination: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move forward to `to`. Returns `false` if already at or past it.
    pub(crate) fn advance(&self, to: SessionState) -> bool {
        let advanced = self.state.send_if_modified(|current| {
            if to > *current {
                *current = to;
                true
            } else {
                false
            }
        });
        if advanced {
            debug!("Session state -> {}", to);
        }
        advanced
    }

    pub(crate) fn termination(&self) -> Option<Termination> {
        self.termination.lock().clone()
    }

    /// Session-fatal error: record the cause, stop accepting writes and
    /// cancel both loops.
    pub(crate) fn fail(&self, cause: Termination) {
        {
            let mut termination = self.termination.lock();
            if termination.is_none() {
                warn!("Session failed: {}", cause);
                *termination = Some(cause);
            }
        }
        self.queue.seal(None);
        self.advance(SessionState::Closed);
        self.cancel.cancel();
    }

    /// Record `outcome` unless a failure was recorded first, mark the
    /// session closed and return the recorded termination.
    fn finish(&self, outcome: Termination) -> Termination {
        let termination = self.termination.lock().get_or_insert(outcome).clone();
        self.advance(SessionState::Closed);
        termination
    }

    fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

struct SessionTasks {
    sender: JoinHandle<SenderExit>,
    receiver: JoinHandle<Termination>,
    sender_cancel: CancellationToken,
}

// =============================================================================
// Builder
// =============================================================================

/// Configures and opens a [`StreamSession`].
pub struct SessionBuilder<D: MessageDecoder> {
    decoder: D,
    config: SessionConfig,
    observers: Vec<EventObserver<D::Output>>,
}

impl<D: MessageDecoder> SessionBuilder<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            config: SessionConfig::default(),
            observers: Vec::new(),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an observer before any message can arrive.
    pub fn observer(mut self, observer: EventObserver<D::Output>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Obtain a credential, open the transport, enqueue the initial control
    /// message and start both loops.
    ///
    /// On error nothing is left running and no frame has been sent.
    pub async fn connect(
        self,
        connector: &dyn Connector,
        credentials: &dyn CredentialProvider,
        endpoint: SessionEndpoint,
    ) -> SessionResult<StreamSession<D::Output>> {
        let id = Uuid::new_v4();
        let span = info_span!("watson_session", session_id = %id);
        self.connect_inner(id, span.clone(), connector, credentials, endpoint)
            .instrument(span)
            .await
    }

    async fn connect_inner(
        self,
        id: Uuid,
        span: Span,
        connector: &dyn Connector,
        credentials: &dyn CredentialProvider,
        endpoint: SessionEndpoint,
    ) -> SessionResult<StreamSession<D::Output>> {
        let SessionBuilder {
            decoder,
            config,
            observers,
        } = self;

        let token = credentials.token().await?;
        let headers = vec![(
            "Authorization".to_string(),
            bearer(token.as_str()).to_string(),
        )];

        info!("Connecting to {}", redact_query(&endpoint.url));
        let transport = timeout(
            config.connect_timeout,
            connector.open(&endpoint.url, &headers),
        )
        .await
        .map_err(|_| {
            SessionError::Connection(TransportError::Connect(format!(
                "handshake timed out after {:?}",
                config.connect_timeout
            )))
        })?
        .map_err(SessionError::Connection)?;
        let transport: Arc<dyn Transport> = Arc::from(transport);

        let (queue, outbound) = OutboundQueue::new();
        if queue.push(endpoint.initial_control).is_err() {
            return Err(SessionError::NotStreaming(SessionState::Connecting));
        }

        let shared = Arc::new(SessionShared::new(queue));
        let observers = Observers::new(observers);
        let tasks = launch(
            &shared,
            &transport,
            outbound,
            Arc::new(decoder),
            &observers,
            &config,
            &span,
        );
        info!("Session streaming");

        Ok(StreamSession {
            id,
            span,
            shared,
            observers,
            request_open: Mutex::new(true),
            terminal_control: endpoint.terminal_control,
            transport: Mutex::new(Some(transport)),
            tasks: tokio::sync::Mutex::new(Some(tasks)),
            config,
        })
    }
}

/// Spawn the sender and receiver loops for a freshly opened transport.
///
/// The session is `Streaming` before either loop runs.
fn launch<D: MessageDecoder>(
    shared: &Arc<SessionShared>,
    transport: &Arc<dyn Transport>,
    outbound: OutboundReceiver,
    decoder: Arc<D>,
    observers: &Observers<D::Output>,
    config: &SessionConfig,
    span: &Span,
) -> SessionTasks {
    shared.advance(SessionState::Streaming);
    let sender_cancel = shared.cancel.child_token();

    let sender = {
        let transport = transport.clone();
        let shared = shared.clone();
        let cancel = sender_cancel.clone();
        tokio::spawn(
            async move {
                let exit = run_sender(transport, outbound, cancel).await;
                if let SenderExit::Failed { error, .. } = &exit {
                    shared.fail(Termination::SendFailed(error.to_string()));
                }
                exit
            }
            .instrument(span.clone()),
        )
    };

    let receiver = tokio::spawn(
        run_receiver(
            transport.clone(),
            decoder,
            observers.clone(),
            shared.clone(),
            config.max_message_size,
            config.close_timeout,
        )
        .instrument(span.clone()),
    );

    SessionTasks {
        sender,
        receiver,
        sender_cancel,
    }
}

// =============================================================================
// Session
// =============================================================================

/// One full-duplex streaming session.
///
/// Writes are queued and transmitted in order by a dedicated sender task.
/// Inbound messages are decoded and published to observers by a dedicated
/// receiver task. All methods take `&self`; the handle can be shared across
/// tasks behind an `Arc`.
pub struct StreamSession<T> {
    id: Uuid,
    span: Span,
    shared: Arc<SessionShared>,
    observers: Observers<T>,
    /// Whether a request is open, i.e. the terminal control message is owed.
    request_open: Mutex<bool>,
    terminal_control: OutboundFrame,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    tasks: tokio::sync::Mutex<Option<SessionTasks>>,
    config: SessionConfig,
}

impl<T> StreamSession<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Watch lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// How the session ended, once it has.
    pub fn termination(&self) -> Option<Termination> {
        self.shared.termination()
    }

    /// Frames queued but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Register an observer. Events that were already published are not
    /// replayed.
    pub fn subscribe(&self, observer: EventObserver<T>) {
        self.observers.add(observer);
    }

    /// Queue a frame for transmission.
    ///
    /// Never waits for the network. Fails with
    /// [`SessionError::NotStreaming`] once the session is stopping or closed.
    pub fn enqueue(&self, frame: OutboundFrame) -> SessionResult<()> {
        let state = self.state();
        if state != SessionState::Streaming {
            return Err(SessionError::NotStreaming(state));
        }
        self.shared
            .queue
            .push(frame)
            .map_err(|_| SessionError::NotStreaming(self.state()))
    }

    /// Queue a chunk of audio. Empty chunks are ignored since an empty
    /// binary message means end-of-audio to the recognizer.
    pub fn send_audio(&self, audio: impl Into<Bytes>) -> SessionResult<()> {
        let audio = audio.into();
        if audio.is_empty() {
            debug!("Ignoring empty audio chunk");
            return Ok(());
        }
        self.enqueue(OutboundFrame::binary(audio))
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> SessionResult<()> {
        self.enqueue(OutboundFrame::text(text))
    }

    /// Open a new request on the same connection by queueing `control`.
    pub fn start_request(&self, control: OutboundFrame) -> SessionResult<()> {
        let mut open = self.request_open.lock();
        self.enqueue(control)?;
        *open = true;
        Ok(())
    }

    /// End the current request by queueing the terminal control message.
    /// Does nothing if no request is open.
    pub fn stop(&self) -> SessionResult<()> {
        let mut open = self.request_open.lock();
        if !*open {
            debug!("No open request; stop ignored");
            return Ok(());
        }
        self.enqueue(self.terminal_control.clone())?;
        *open = false;
        Ok(())
    }

    pub fn is_request_open(&self) -> bool {
        *self.request_open.lock()
    }

    /// Gracefully shut the session down.
    ///
    /// Queues the terminal control message if a request is open, flushes the
    /// outbound queue, performs the close handshake and waits for the
    /// receiver to finish. Every wait is bounded. Safe to call repeatedly and
    /// concurrently; every call returns the same termination.
    pub async fn close(&self) -> Termination {
        let mut tasks = self.tasks.lock().await;
        let Some(running) = tasks.take() else {
            return self.shared.termination().unwrap_or(Termination::Normal);
        };
        self.shutdown(running).instrument(self.span.clone()).await
    }

    async fn shutdown(&self, tasks: SessionTasks) -> Termination {
        let SessionTasks {
            mut sender,
            mut receiver,
            sender_cancel,
        } = tasks;
        info!("Closing session");

        {
            let mut open = self.request_open.lock();
            let last = std::mem::take(&mut *open).then(|| self.terminal_control.clone());
            if !self.shared.queue.seal(last) {
                debug!("Outbound queue already sealed");
            }
        }
        self.shared.advance(SessionState::Stopping);

        let sender_done = match timeout(self.config.drain_timeout, &mut sender).await {
            Ok(Ok(exit)) => {
                debug!("Sender loop exited after {} frame(s): {:?}", exit.sent(), exit);
                true
            }
            Ok(Err(e)) => {
                warn!("Sender task failed: {}", e);
                true
            }
            Err(_) => {
                warn!(
                    "Outbound queue not drained within {:?} ({} frame(s) pending); abandoning",
                    self.config.drain_timeout,
                    self.shared.queue.pending()
                );
                sender_cancel.cancel();
                false
            }
        };

        let transport = self.transport.lock().clone();
        if let Some(transport) = transport {
            if transport.state() == TransportState::Open {
                match timeout(self.config.close_timeout, transport.close(CloseReason::normal()))
                    .await
                {
                    Ok(Ok(())) => debug!("Close handshake sent"),
                    Ok(Err(e)) => warn!("Close handshake failed: {}", e),
                    Err(_) => warn!(
                        "Close handshake not sent within {:?}",
                        self.config.close_timeout
                    ),
                }
            }
        }

        let outcome = match timeout(self.config.receiver_exit_timeout, &mut receiver).await {
            Ok(Ok(termination)) => termination,
            Ok(Err(e)) => {
                warn!("Receiver task failed: {}", e);
                Termination::ReceiveFailed(e.to_string())
            }
            Err(_) => {
                warn!(
                    "Receiver did not finish within {:?}; cancelling",
                    self.config.receiver_exit_timeout
                );
                self.shared.cancel.cancel();
                match timeout(ABORT_GRACE, &mut receiver).await {
                    Ok(_) => {}
                    Err(_) => {
                        receiver.abort();
                        let _ = receiver.await;
                    }
                }
                Termination::Cancelled
            }
        };

        self.shared.cancel.cancel();
        if !sender_done {
            sender.abort();
            let _ = sender.await;
        }

        self.transport.lock().take();
        let termination = self.shared.finish(outcome);
        info!("Session closed: {}", termination);
        termination
    }
}

impl<T> fmt::Debug for StreamSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pending_frames", &self.pending_frames())
            .finish()
    }
}

/// Dropping an open session runs the same shutdown as [`StreamSession::close`]
/// and blocks until it completes. That needs a multi-threaded runtime; on a
/// current-thread runtime, or outside any runtime, both loops are aborted
/// instead and the close handshake is skipped.
impl<T> Drop for StreamSession<T> {
    fn drop(&mut self) {
        let Some(tasks) = self.tasks.get_mut().take() else {
            return;
        };
        let span = self.span.clone();

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                span.in_scope(|| warn!("Session dropped without close; shutting down"));
                let termination = tokio::task::block_in_place(|| {
                    handle.block_on(self.shutdown(tasks).instrument(span.clone()))
                });
                span.in_scope(|| debug!("Dropped session ended: {}", termination));
            }
            _ => {
                let _enter = span.enter();
                warn!("Session dropped without close outside a multi-threaded runtime; aborting loops");
                self.shared.queue.seal(None);
                self.shared.cancel.cancel();
                tasks.sender.abort();
                tasks.receiver.abort();
                self.shared.finish(Termination::Cancelled);
            }
        }
    }
}

/// Strip the query string (it may carry tokens) for logging.
fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
