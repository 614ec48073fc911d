//! IBM Watson Speech-to-Text response messages.
//!
//! The service answers on the same socket with JSON text messages: a
//! `listening` state once a request is accepted, any number of `results`
//! messages, optional `speaker_labels`, and `error` objects. Warnings about
//! unknown parameters ride along on results and errors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::session::{FrameKind, InboundMessage, MessageDecoder, SessionError};
use crate::core::stt::base::STTResult;

// =============================================================================
// Main Response Types
// =============================================================================

/// IBM Watson STT WebSocket response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IbmWatsonMessage {
    /// Recognition results
    Results(ResultsMessage),
    /// Service error or warning
    Error(ErrorMessage),
    /// Speaker diarization results
    SpeakerLabels(SpeakerLabelsMessage),
    /// State notification (`listening`)
    State(StateMessage),
}

impl IbmWatsonMessage {
    /// Parse a JSON string into an IBM Watson message.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The service accepted a request and waits for audio.
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::State(state) if state.is_listening())
    }

    pub fn is_results(&self) -> bool {
        matches!(self, Self::Results(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Warnings attached to the message, if any.
    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Results(results) => results.warnings.as_deref().unwrap_or_default(),
            Self::Error(error) => error.warnings.as_deref().unwrap_or_default(),
            _ => &[],
        }
    }
}

/// Decodes inbound text messages into [`IbmWatsonMessage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatsonMessageDecoder;

impl MessageDecoder for WatsonMessageDecoder {
    type Output = IbmWatsonMessage;

    fn decode(&self, message: &InboundMessage) -> Result<IbmWatsonMessage, SessionError> {
        if message.kind != FrameKind::Text {
            return Err(SessionError::Decode(format!(
                "unexpected {} message of {} bytes",
                message.kind,
                message.payload.len()
            )));
        }
        serde_json::from_slice(&message.payload).map_err(|e| SessionError::Decode(e.to_string()))
    }
}

// =============================================================================
// Recognition Results
// =============================================================================

/// Recognition results message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsMessage {
    pub results: Vec<RecognitionResult>,
    /// Index of the first result in this message within the request.
    #[serde(default)]
    pub result_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_labels: Option<Vec<SpeakerLabel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

impl ResultsMessage {
    /// The most recent transcript.
    pub fn to_stt_result(&self) -> Option<STTResult> {
        self.results.last().and_then(|r| r.to_stt_result())
    }

    pub fn all_transcripts(&self) -> Vec<STTResult> {
        self.results.iter().filter_map(|r| r.to_stt_result()).collect()
    }
}

/// Single recognition result within a results message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Whether this result will not change anymore.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Hypotheses, best first.
    pub alternatives: Vec<TranscriptionAlternative>,
    /// Spotted keywords, keyed by the requested keyword.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords_result: Option<HashMap<String, Vec<KeywordMatch>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_alternatives: Option<Vec<WordAlternatives>>,
    /// Why the service ended the phrase (`end_of_data`, `silence`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_utterance: Option<String>,
}

impl RecognitionResult {
    /// Convert using the best alternative.
    pub fn to_stt_result(&self) -> Option<STTResult> {
        self.alternatives.first().map(|alt| {
            STTResult::new(
                alt.transcript.trim().to_string(),
                self.is_final,
                self.is_final
                    && self
                        .end_of_utterance
                        .as_ref()
                        .is_some_and(|s| s == "end_of_data" || s == "end_of_utterance"),
                alt.confidence.unwrap_or(0.0) as f32,
            )
        })
    }

    pub fn get_word_timestamps(&self) -> Vec<WordTimestamp> {
        self.alternatives
            .first()
            .and_then(|alt| alt.timestamps.clone())
            .unwrap_or_default()
    }

    pub fn get_word_confidences(&self) -> Vec<WordConfidence> {
        self.alternatives
            .first()
            .and_then(|alt| alt.word_confidence.clone())
            .unwrap_or_default()
    }
}

/// Transcription hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionAlternative {
    pub transcript: String,
    /// Only reported for the best alternative of a final result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// `[[word, start, end], ...]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<WordTimestamp>>,
    /// `[[word, confidence], ...]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_confidence: Option<Vec<WordConfidence>>,
}

/// Word-level timestamp [word, start_time, end_time].
pub type WordTimestamp = (String, f64, f64);

/// Word-level confidence [word, confidence].
pub type WordConfidence = (String, f64);

/// One spotted keyword occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    /// The keyword as it appears in the audio.
    pub normalized_text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: f64,
}

/// Word alternatives (confusion network entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlternatives {
    pub start_time: f64,
    pub end_time: f64,
    pub alternatives: Vec<WordAlternative>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlternative {
    pub confidence: f64,
    pub word: String,
}

// =============================================================================
// State Messages
// =============================================================================

/// State notification. The service only reports `listening`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    pub state: String,
}

impl StateMessage {
    pub fn is_listening(&self) -> bool {
        self.state == "listening"
    }
}

// =============================================================================
// Speaker Labels
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerLabelsMessage {
    pub speaker_labels: Vec<SpeakerLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerLabel {
    /// Start time of the segment in seconds.
    pub from: f64,
    /// End time of the segment in seconds.
    pub to: f64,
    pub speaker: i32,
    pub confidence: f64,
    #[serde(rename = "final")]
    pub is_final: bool,
}

// =============================================================================
// Error Messages
// =============================================================================

/// Error reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

impl ErrorMessage {
    /// Errors after which the service closes the connection.
    pub fn is_critical(&self) -> bool {
        self.error.contains("session timed out")
            || self.error.contains("session closed")
            || self.error.contains("invalid state")
            || self.code.is_some_and(|c| c >= 500)
    }

    /// The service gave up waiting for speech.
    pub fn is_inactivity_timeout(&self) -> bool {
        self.error.contains("inactivity")
            || self.error.contains("no speech")
            || self.code == Some(408)
    }
}

// =============================================================================
// Tests
// =============================================================================
