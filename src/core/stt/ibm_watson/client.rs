//! IBM Watson STT client built on [`StreamSession`].
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │   send_audio()  │────▶│  StreamSession   │────▶│    WebSocket    │
//! └─────────────────┘     │  (sender loop)   │     └────────┬────────┘
//!                         └──────────────────┘              │
//!                         ┌──────────────────┐              │
//!                         │ event channel    │◀─────────────┘
//!                         └────────┬─────────┘  (receiver loop)
//!                                  │
//!                         ┌────────▼─────────┐
//!                         │  Event Forward   │────▶ User Callbacks
//!                         │      Task        │
//!                         └──────────────────┘
//! ```
//!
//! Observers run on the session's receiver task, so the client only moves
//! events into a channel there and awaits the user callbacks on its own
//! forwarding task.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::IbmWatsonSTTConfig;
use super::messages::{IbmWatsonMessage, WatsonMessageDecoder};
use crate::auth::CredentialProvider;
use crate::core::session::{
    Connector, SessionBuilder, SessionEndpoint, SessionEvent, SessionState, StreamSession,
    Termination, WebSocketConnector, channel_observer,
};
use crate::core::stt::base::{BaseSTT, STTError, STTErrorCallback, STTResultCallback};

/// How long `disconnect` waits for queued callbacks to run.
const FORWARD_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type SharedCallback<C> = Arc<Mutex<Option<C>>>;

/// IBM Watson Speech-to-Text streaming client.
///
/// Holds at most one live session. `connect` opens a session and the first
/// recognition request; `stop` and `start_request` bracket further requests
/// on the same connection; `disconnect` closes gracefully.
pub struct IbmWatsonSTT {
    config: IbmWatsonSTTConfig,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
    session: Option<StreamSession<IbmWatsonMessage>>,
    forward_handle: Option<JoinHandle<()>>,
    result_callback: SharedCallback<STTResultCallback>,
    error_callback: SharedCallback<STTErrorCallback>,
    /// Number of `listening` notices received on the current connection.
    listening: Arc<watch::Sender<u64>>,
    /// Outcome of the most recently released session.
    last_termination: Option<Termination>,
}

impl IbmWatsonSTT {
    /// Create a client. Fails if the configuration is invalid.
    pub fn new(
        config: IbmWatsonSTTConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, STTError> {
        config.validate()?;
        let connector = Arc::new(WebSocketConnector::new(config.session.max_message_size));
        Ok(Self {
            config,
            credentials,
            connector,
            session: None,
            forward_handle: None,
            result_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            listening: Arc::new(watch::channel(0).0),
            last_termination: None,
        })
    }

    /// Replace the transport factory.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn config(&self) -> &IbmWatsonSTTConfig {
        &self.config
    }

    /// Identifier of the live session, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(StreamSession::id)
    }

    /// How the current (or last disconnected) session ended.
    pub fn termination(&self) -> Option<Termination> {
        match &self.session {
            Some(session) => session.termination(),
            None => self.last_termination.clone(),
        }
    }

    /// End the current recognition request. Final results for the audio
    /// sent so far still arrive through the result callback.
    pub fn stop(&self) -> Result<(), STTError> {
        self.live_session()?.stop()?;
        debug!("Queued stop message");
        Ok(())
    }

    /// End the current request and wait until the service reports that it
    /// has delivered the final results (its next `listening` notice).
    ///
    /// Returns `false` if `wait` elapsed or the session ended first.
    pub async fn stop_and_wait(&self, wait: Duration) -> Result<bool, STTError> {
        let session = self.live_session()?;
        let mut listening = self.listening.subscribe();
        let mut state = session.state_changes();

        let finished = async {
            // The notice acknowledging the first start must not be mistaken
            // for the one ending the request.
            if listening.wait_for(|n| *n >= 1).await.is_err() {
                return false;
            }
            let seen = *listening.borrow_and_update();
            if let Err(e) = session.stop() {
                debug!("Stop not queued: {}", e);
                return false;
            }
            listening.wait_for(|n| *n > seen).await.is_ok()
        };

        tokio::select! {
            done = timeout(wait, finished) => Ok(done.unwrap_or(false)),
            _ = state.wait_for(|s| *s == SessionState::Closed) => Ok(false),
        }
    }

    /// Open a new recognition request on the current connection.
    pub fn start_request(&self) -> Result<(), STTError> {
        let start = self.config.start_message()?;
        self.live_session()?.start_request(start)?;
        debug!("Queued start message");
        Ok(())
    }

    fn live_session(&self) -> Result<&StreamSession<IbmWatsonMessage>, STTError> {
        self.session.as_ref().ok_or_else(|| {
            STTError::ConnectionFailed("Not connected to IBM Watson Speech-to-Text".to_string())
        })
    }

    /// Close and forget a session that is no longer streaming.
    async fn release_session(&mut self) -> Option<Termination> {
        let session = self.session.take()?;
        let termination = session.close().await;
        drop(session);

        if let Some(mut handle) = self.forward_handle.take() {
            if timeout(FORWARD_DRAIN_TIMEOUT, &mut handle).await.is_err() {
                warn!("Callbacks still running after {:?}; aborting", FORWARD_DRAIN_TIMEOUT);
                handle.abort();
            }
        }
        self.last_termination = Some(termination.clone());
        Some(termination)
    }
}

// =============================================================================
// Event forwarding
// =============================================================================

async fn forward_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent<IbmWatsonMessage>>,
    interim_results: bool,
    listening: Arc<watch::Sender<u64>>,
    result_callback: SharedCallback<STTResultCallback>,
    error_callback: SharedCallback<STTErrorCallback>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Message(message) => {
                for warning in message.warnings() {
                    warn!("IBM Watson warning: {}", warning);
                }
                if message.is_listening() {
                    listening.send_modify(|n| *n += 1);
                }
                handle_message(message, interim_results, &result_callback, &error_callback)
                    .await;
            }
            SessionEvent::DecodeFailed { error, raw } => {
                warn!(
                    "Failed to parse IBM Watson message: {} - raw: {}",
                    error,
                    String::from_utf8_lossy(&raw.payload)
                );
            }
            SessionEvent::Closed(termination) => {
                if termination.is_failure() {
                    error!("IBM Watson session failed: {}", termination);
                    report_error(&error_callback, STTError::from(&termination)).await;
                } else {
                    debug!("IBM Watson session ended: {}", termination);
                }
                break;
            }
        }
    }
    debug!("Event forwarding finished");
}

async fn handle_message(
    message: IbmWatsonMessage,
    interim_results: bool,
    result_callback: &SharedCallback<STTResultCallback>,
    error_callback: &SharedCallback<STTErrorCallback>,
) {
    match message {
        IbmWatsonMessage::Results(results) => {
            let callback = result_callback.lock().await.clone();
            for result in results.all_transcripts() {
                if !result.is_final && !interim_results {
                    continue;
                }
                if result.transcript.is_empty() {
                    continue;
                }
                debug!(
                    "IBM Watson result (final={}): {}",
                    result.is_final, result.transcript
                );
                if let Some(callback) = &callback {
                    callback(result).await;
                }
            }
        }
        IbmWatsonMessage::State(state) => {
            if state.is_listening() {
                debug!("IBM Watson is listening");
            } else {
                debug!("IBM Watson state change: {}", state.state);
            }
        }
        IbmWatsonMessage::SpeakerLabels(labels) => {
            debug!(
                "Received speaker labels: {} entries",
                labels.speaker_labels.len()
            );
        }
        IbmWatsonMessage::Error(error_msg) => {
            error!("IBM Watson error: {}", error_msg.error);
            if error_msg.is_critical() || !error_msg.is_inactivity_timeout() {
                report_error(error_callback, STTError::ProviderError(error_msg.error)).await;
            } else {
                warn!("IBM Watson inactivity timeout");
            }
        }
    }
}

async fn report_error(error_callback: &SharedCallback<STTErrorCallback>, error: STTError) {
    let callback = error_callback.lock().await.clone();
    if let Some(callback) = callback {
        callback(error).await;
    }
}

// =============================================================================
// BaseSTT Trait Implementation
// =============================================================================

#[async_trait::async_trait]
impl BaseSTT for IbmWatsonSTT {
    async fn connect(&mut self) -> Result<(), STTError> {
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.state() < SessionState::Stopping)
        {
            return Err(STTError::ConnectionFailed(
                "Already connected to IBM Watson".to_string(),
            ));
        }
        if let Some(previous) = self.release_session().await {
            debug!("Released previous session: {}", previous);
        }

        let endpoint = SessionEndpoint {
            url: self.config.build_websocket_url()?,
            initial_control: self.config.start_message()?,
            terminal_control: IbmWatsonSTTConfig::stop_message(),
        };

        self.listening.send_replace(0);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = SessionBuilder::new(WatsonMessageDecoder)
            .config(self.config.session.clone())
            .observer(channel_observer(event_tx))
            .connect(
                self.connector.as_ref(),
                self.credentials.as_ref(),
                endpoint,
            )
            .await?;

        self.forward_handle = Some(tokio::spawn(forward_events(
            event_rx,
            self.config.recognition.interim_results,
            self.listening.clone(),
            self.result_callback.clone(),
            self.error_callback.clone(),
        )));

        info!(
            session_id = %session.id(),
            model = %self.config.query.model,
            "Connected to IBM Watson Speech-to-Text"
        );
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), STTError> {
        match self.release_session().await {
            Some(termination) => {
                info!("Disconnected from IBM Watson Speech-to-Text: {}", termination)
            }
            None => debug!("Not connected; nothing to disconnect"),
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state() == SessionState::Streaming)
    }

    async fn send_audio(&mut self, audio_data: Bytes) -> Result<(), STTError> {
        let data_len = audio_data.len();
        self.live_session()?.send_audio(audio_data)?;
        debug!("Queued {} bytes of audio for IBM Watson STT", data_len);
        Ok(())
    }

    async fn on_result(&mut self, callback: STTResultCallback) -> Result<(), STTError> {
        *self.result_callback.lock().await = Some(callback);
        Ok(())
    }

    async fn on_error(&mut self, callback: STTErrorCallback) -> Result<(), STTError> {
        *self.error_callback.lock().await = Some(callback);
        Ok(())
    }

    fn get_provider_info(&self) -> &'static str {
        "IBM Watson Speech-to-Text"
    }
}

impl Drop for IbmWatsonSTT {
    fn drop(&mut self) {
        if let Some(handle) = self.forward_handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for IbmWatsonSTT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IbmWatsonSTT")
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.query.model)
            .field("session", &self.session)
            .finish()
    }
}
