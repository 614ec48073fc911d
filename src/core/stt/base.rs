use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::auth::AuthError;
use crate::core::session::{SessionError, Termination, TransportError};

/// A transcription delivered to the result callback.
#[derive(Debug, Clone, PartialEq)]
pub struct STTResult {
    pub transcript: String,
    /// The service will not revise this result.
    pub is_final: bool,
    /// The speaker finished an utterance.
    pub is_speech_final: bool,
    /// 0.0 to 1.0; 0.0 when the service did not score the result.
    pub confidence: f32,
}

impl STTResult {
    pub fn new(
        transcript: String,
        is_final: bool,
        is_speech_final: bool,
        confidence: f32,
    ) -> Self {
        Self {
            transcript,
            is_final,
            is_speech_final,
            confidence,
        }
    }
}

/// Errors reported by STT providers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum STTError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),
}

impl From<AuthError> for STTError {
    fn from(error: AuthError) -> Self {
        STTError::AuthenticationFailed(error.to_string())
    }
}

impl From<SessionError> for STTError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Connection(TransportError::Rejected { status, message })
                if status == 401 || status == 403 =>
            {
                STTError::AuthenticationFailed(format!("{message} ({status})"))
            }
            SessionError::Connection(e) => STTError::ConnectionFailed(e.to_string()),
            SessionError::Credential(e) => e.into(),
            SessionError::NotStreaming(state) => {
                STTError::ConnectionFailed(format!("Session is not streaming ({state})"))
            }
            SessionError::Encode(e) => STTError::ConfigurationError(e.to_string()),
            SessionError::Decode(e) => STTError::ProviderError(e),
            other => STTError::NetworkError(other.to_string()),
        }
    }
}

impl From<&Termination> for STTError {
    fn from(termination: &Termination) -> Self {
        match termination {
            Termination::PayloadTooLarge { .. } => STTError::ProviderError(termination.to_string()),
            _ => STTError::NetworkError(termination.to_string()),
        }
    }
}

/// Async callback receiving transcription results.
pub type STTResultCallback =
    Arc<dyn Fn(STTResult) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Async callback receiving provider errors.
pub type STTErrorCallback =
    Arc<dyn Fn(STTError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Common interface of streaming speech-to-text providers.
#[async_trait::async_trait]
pub trait BaseSTT: Send + Sync {
    /// Open the streaming connection and start the first request.
    async fn connect(&mut self) -> Result<(), STTError>;

    /// End the current request and close the connection.
    async fn disconnect(&mut self) -> Result<(), STTError>;

    /// Whether audio can be sent.
    fn is_ready(&self) -> bool;

    async fn send_audio(&mut self, audio_data: Bytes) -> Result<(), STTError>;

    async fn on_result(&mut self, callback: STTResultCallback) -> Result<(), STTError>;

    async fn on_error(&mut self, callback: STTErrorCallback) -> Result<(), STTError>;

    fn get_provider_info(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_handshake_is_an_auth_failure() {
        let error = SessionError::Connection(TransportError::Rejected {
            status: 401,
            message: "Unauthorized".to_string(),
        });
        assert_eq!(
            STTError::from(error),
            STTError::AuthenticationFailed("Unauthorized (401)".to_string())
        );
    }

    #[test]
    fn test_other_rejections_are_connection_failures() {
        let error = SessionError::Connection(TransportError::Rejected {
            status: 503,
            message: "Service Unavailable".to_string(),
        });
        assert!(matches!(STTError::from(error), STTError::ConnectionFailed(_)));
    }

    #[test]
    fn test_missing_credential_maps_to_auth_failure() {
        let error = SessionError::Credential(AuthError::Missing("no api key".to_string()));
        assert!(matches!(
            STTError::from(error),
            STTError::AuthenticationFailed(_)
        ));
    }
}
