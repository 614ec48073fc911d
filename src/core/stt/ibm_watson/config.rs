//! IBM Watson Speech-to-Text configuration.
//!
//! Everything needed to open a recognition connection: where to connect,
//! which model and customizations to use (URL query string), and how to
//! recognize (the `start` message sent over the socket).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::core::session::{OutboundFrame, SessionConfig};
use crate::core::stt::base::STTError;

// =============================================================================
// Constants
// =============================================================================

/// Default IBM Watson STT model for English (US) multimedia content.
pub const DEFAULT_MODEL: &str = "en-US_Multimedia";

/// Default inactivity timeout in seconds (30 seconds).
pub const DEFAULT_INACTIVITY_TIMEOUT: i32 = 30;

/// Maximum number of keywords the service will spot.
pub const MAX_KEYWORDS: usize = 1000;

/// Path of the recognize endpoint on the legacy shared hosts.
const LEGACY_RECOGNIZE_PATH: &str = "/speech-to-text/api/v1/recognize";

// =============================================================================
// Region Configuration
// =============================================================================

/// IBM Watson Speech-to-Text service regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IbmRegion {
    /// Dallas, Texas (US South)
    #[default]
    UsSouth,
    /// Washington, D.C. (US East)
    UsEast,
    /// Frankfurt, Germany (EU Central)
    EuDe,
    /// London, UK (EU GB)
    EuGb,
    /// Sydney, Australia (AU SYD)
    AuSyd,
    /// Tokyo, Japan (JP TOK)
    JpTok,
    /// Seoul, South Korea (KR SEO)
    KrSeo,
}

impl IbmRegion {
    /// Get the Speech-to-Text API hostname for this region.
    pub fn stt_hostname(&self) -> &'static str {
        match self {
            Self::UsSouth => "api.us-south.speech-to-text.watson.cloud.ibm.com",
            Self::UsEast => "api.us-east.speech-to-text.watson.cloud.ibm.com",
            Self::EuDe => "api.eu-de.speech-to-text.watson.cloud.ibm.com",
            Self::EuGb => "api.eu-gb.speech-to-text.watson.cloud.ibm.com",
            Self::AuSyd => "api.au-syd.speech-to-text.watson.cloud.ibm.com",
            Self::JpTok => "api.jp-tok.speech-to-text.watson.cloud.ibm.com",
            Self::KrSeo => "api.kr-seo.speech-to-text.watson.cloud.ibm.com",
        }
    }

    /// Get the region code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsSouth => "us-south",
            Self::UsEast => "us-east",
            Self::EuDe => "eu-de",
            Self::EuGb => "eu-gb",
            Self::AuSyd => "au-syd",
            Self::JpTok => "jp-tok",
            Self::KrSeo => "kr-seo",
        }
    }
}

impl fmt::Display for IbmRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IbmRegion {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us-south" => Ok(Self::UsSouth),
            "us-east" => Ok(Self::UsEast),
            "eu-de" => Ok(Self::EuDe),
            "eu-gb" => Ok(Self::EuGb),
            "au-syd" => Ok(Self::AuSyd),
            "jp-tok" => Ok(Self::JpTok),
            "kr-seo" => Ok(Self::KrSeo),
            other => Err(STTError::ConfigurationError(format!(
                "Unknown IBM Cloud region: {other}"
            ))),
        }
    }
}

/// Shared stream hosts of the pre-instance Watson platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegacyHost {
    /// US South and UK.
    UsSouthUk,
    /// Germany.
    Germany,
    /// Sydney and AP North.
    SydneyApNorth,
    /// US East.
    UsEast,
}

impl LegacyHost {
    pub fn hostname(&self) -> &'static str {
        match self {
            Self::UsSouthUk => "stream.watsonplatform.net",
            Self::Germany => "stream-fra.watsonplatform.net",
            Self::SydneyApNorth => "gateway-syd.watsonplatform.net",
            Self::UsEast => "gateway-wdc.watsonplatform.net",
        }
    }
}

/// Where the recognize endpoint lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IbmEndpoint {
    /// A service instance in an IBM Cloud region.
    Instance {
        #[serde(default)]
        region: IbmRegion,
        instance_id: String,
    },
    /// A legacy shared stream host.
    Legacy(LegacyHost),
    /// An explicit `ws://` or `wss://` recognize URL (private endpoints,
    /// proxies, test servers).
    Url(String),
}

impl Default for IbmEndpoint {
    fn default() -> Self {
        Self::Instance {
            region: IbmRegion::default(),
            instance_id: String::new(),
        }
    }
}

impl IbmEndpoint {
    /// Recognize URL without query string.
    pub fn recognize_url(&self) -> Result<String, STTError> {
        match self {
            Self::Instance {
                region,
                instance_id,
            } => {
                if instance_id.trim().is_empty() {
                    return Err(STTError::ConfigurationError(
                        "IBM Watson instance_id is required".to_string(),
                    ));
                }
                Ok(format!(
                    "wss://{}/instances/{}/v1/recognize",
                    region.stt_hostname(),
                    instance_id.trim()
                ))
            }
            Self::Legacy(host) => Ok(format!("wss://{}{}", host.hostname(), LEGACY_RECOGNIZE_PATH)),
            Self::Url(url) => {
                crate::utils::url_validation::validate_endpoint_url(url)
                    .map_err(|e| STTError::ConfigurationError(e.to_string()))?;
                Ok(url.trim_end_matches('?').to_string())
            }
        }
    }
}

// =============================================================================
// Model Configuration
// =============================================================================

/// IBM Watson Speech-to-Text models.
///
/// - Next-generation models: `*_Multimedia` (16kHz+) and `*_Telephony` (8kHz)
/// - Previous-generation models: `*_BroadbandModel` (16kHz+) and
///   `*_NarrowbandModel` (8kHz)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IbmModel {
    // Next-generation models
    #[default]
    EnUsMultimedia,
    EnUsTelephony,
    EnGbMultimedia,
    EnGbTelephony,
    EnAuMultimedia,
    EnAuTelephony,
    EsEsMultimedia,
    EsEsTelephony,
    EsLaTelephony,
    FrFrMultimedia,
    FrFrTelephony,
    FrCaMultimedia,
    FrCaTelephony,
    DeDeMultimedia,
    DeDeTelephony,
    ItItMultimedia,
    ItItTelephony,
    PtBrMultimedia,
    PtBrTelephony,
    JaJpMultimedia,
    JaJpTelephony,
    KoKrMultimedia,
    KoKrTelephony,
    ZhCnTelephony,
    NlNlMultimedia,
    NlNlTelephony,

    // Previous-generation models
    ArArBroadband,
    DeDeBroadband,
    EnGbBroadband,
    EnGbNarrowband,
    EnUsBroadband,
    EnUsNarrowband,
    EsEsBroadband,
    EsEsNarrowband,
    FrFrBroadband,
    JaJpBroadband,
    JaJpNarrowband,
    KoKrBroadband,
    KoKrNarrowband,
    PtBrBroadband,
    PtBrNarrowband,
    ZhCnBroadband,
    ZhCnNarrowband,

    /// Custom model (user-specified model name)
    Custom(String),
}

impl IbmModel {
    /// Every built-in model.
    pub fn catalog() -> Vec<IbmModel> {
        vec![
            Self::EnUsMultimedia,
            Self::EnUsTelephony,
            Self::EnGbMultimedia,
            Self::EnGbTelephony,
            Self::EnAuMultimedia,
            Self::EnAuTelephony,
            Self::EsEsMultimedia,
            Self::EsEsTelephony,
            Self::EsLaTelephony,
            Self::FrFrMultimedia,
            Self::FrFrTelephony,
            Self::FrCaMultimedia,
            Self::FrCaTelephony,
            Self::DeDeMultimedia,
            Self::DeDeTelephony,
            Self::ItItMultimedia,
            Self::ItItTelephony,
            Self::PtBrMultimedia,
            Self::PtBrTelephony,
            Self::JaJpMultimedia,
            Self::JaJpTelephony,
            Self::KoKrMultimedia,
            Self::KoKrTelephony,
            Self::ZhCnTelephony,
            Self::NlNlMultimedia,
            Self::NlNlTelephony,
            Self::ArArBroadband,
            Self::DeDeBroadband,
            Self::EnGbBroadband,
            Self::EnGbNarrowband,
            Self::EnUsBroadband,
            Self::EnUsNarrowband,
            Self::EsEsBroadband,
            Self::EsEsNarrowband,
            Self::FrFrBroadband,
            Self::JaJpBroadband,
            Self::JaJpNarrowband,
            Self::KoKrBroadband,
            Self::KoKrNarrowband,
            Self::PtBrBroadband,
            Self::PtBrNarrowband,
            Self::ZhCnBroadband,
            Self::ZhCnNarrowband,
        ]
    }

    /// Get the model identifier string for the API.
    pub fn as_str(&self) -> &str {
        match self {
            Self::EnUsMultimedia => "en-US_Multimedia",
            Self::EnUsTelephony => "en-US_Telephony",
            Self::EnGbMultimedia => "en-GB_Multimedia",
            Self::EnGbTelephony => "en-GB_Telephony",
            Self::EnAuMultimedia => "en-AU_Multimedia",
            Self::EnAuTelephony => "en-AU_Telephony",
            Self::EsEsMultimedia => "es-ES_Multimedia",
            Self::EsEsTelephony => "es-ES_Telephony",
            Self::EsLaTelephony => "es-LA_Telephony",
            Self::FrFrMultimedia => "fr-FR_Multimedia",
            Self::FrFrTelephony => "fr-FR_Telephony",
            Self::FrCaMultimedia => "fr-CA_Multimedia",
            Self::FrCaTelephony => "fr-CA_Telephony",
            Self::DeDeMultimedia => "de-DE_Multimedia",
            Self::DeDeTelephony => "de-DE_Telephony",
            Self::ItItMultimedia => "it-IT_Multimedia",
            Self::ItItTelephony => "it-IT_Telephony",
            Self::PtBrMultimedia => "pt-BR_Multimedia",
            Self::PtBrTelephony => "pt-BR_Telephony",
            Self::JaJpMultimedia => "ja-JP_Multimedia",
            Self::JaJpTelephony => "ja-JP_Telephony",
            Self::KoKrMultimedia => "ko-KR_Multimedia",
            Self::KoKrTelephony => "ko-KR_Telephony",
            Self::ZhCnTelephony => "zh-CN_Telephony",
            Self::NlNlMultimedia => "nl-NL_Multimedia",
            Self::NlNlTelephony => "nl-NL_Telephony",
            Self::ArArBroadband => "ar-AR_BroadbandModel",
            Self::DeDeBroadband => "de-DE_BroadbandModel",
            Self::EnGbBroadband => "en-GB_BroadbandModel",
            Self::EnGbNarrowband => "en-GB_NarrowbandModel",
            Self::EnUsBroadband => "en-US_BroadbandModel",
            Self::EnUsNarrowband => "en-US_NarrowbandModel",
            Self::EsEsBroadband => "es-ES_BroadbandModel",
            Self::EsEsNarrowband => "es-ES_NarrowbandModel",
            Self::FrFrBroadband => "fr-FR_BroadbandModel",
            Self::JaJpBroadband => "ja-JP_BroadbandModel",
            Self::JaJpNarrowband => "ja-JP_NarrowbandModel",
            Self::KoKrBroadband => "ko-KR_BroadbandModel",
            Self::KoKrNarrowband => "ko-KR_NarrowbandModel",
            Self::PtBrBroadband => "pt-BR_BroadbandModel",
            Self::PtBrNarrowband => "pt-BR_NarrowbandModel",
            Self::ZhCnBroadband => "zh-CN_BroadbandModel",
            Self::ZhCnNarrowband => "zh-CN_NarrowbandModel",
            Self::Custom(name) => name,
        }
    }

    /// Narrowband and telephony models expect 8kHz audio.
    pub fn recommended_sample_rate(&self) -> u32 {
        let name = self.as_str();
        if name.ends_with("_Telephony") || name.ends_with("_NarrowbandModel") {
            8000
        } else {
            16000
        }
    }
}

impl fmt::Display for IbmModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IbmModel {
    type Err = std::convert::Infallible;

    /// Unknown names become [`IbmModel::Custom`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(Self::catalog()
            .into_iter()
            .find(|model| model.as_str() == s)
            .unwrap_or_else(|| Self::Custom(s.to_string())))
    }
}

impl Serialize for IbmModel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IbmModel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(name.parse().unwrap_or_else(|never| match never {}))
    }
}

// =============================================================================
// Audio Content Type
// =============================================================================

/// Audio formats accepted in the `content-type` field of the start message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContentType {
    /// Let the service detect the format.
    OctetStream,
    /// mu-law 8kHz, narrowband models only.
    Basic,
    Flac,
    /// Linear PCM 16-bit little-endian.
    L16 { rate: u32, channels: Option<u8> },
    Mp3,
    Mpeg,
    Mulaw { rate: u32 },
    Alaw { rate: u32 },
    Ogg,
    OggOpus,
    OggVorbis,
    Wav,
    Webm,
    WebmOpus,
    WebmVorbis,
}

impl Default for ContentType {
    fn default() -> Self {
        Self::L16 {
            rate: 16000,
            channels: Some(1),
        }
    }
}

impl ContentType {
    /// MIME string sent to the service.
    pub fn mime(&self) -> String {
        match self {
            Self::OctetStream => "application/octet-stream".to_string(),
            Self::Basic => "audio/basic".to_string(),
            Self::Flac => "audio/flac".to_string(),
            Self::L16 {
                rate,
                channels: Some(channels),
            } => format!("audio/l16;rate={rate};channels={channels}"),
            Self::L16 {
                rate,
                channels: None,
            } => format!("audio/l16;rate={rate}"),
            Self::Mp3 => "audio/mp3".to_string(),
            Self::Mpeg => "audio/mpeg".to_string(),
            Self::Mulaw { rate } => format!("audio/mulaw;rate={rate}"),
            Self::Alaw { rate } => format!("audio/alaw;rate={rate}"),
            Self::Ogg => "audio/ogg".to_string(),
            Self::OggOpus => "audio/ogg;codecs=opus".to_string(),
            Self::OggVorbis => "audio/ogg;codecs=vorbis".to_string(),
            Self::Wav => "audio/wav".to_string(),
            Self::Webm => "audio/webm".to_string(),
            Self::WebmOpus => "audio/webm;codecs=opus".to_string(),
            Self::WebmVorbis => "audio/webm;codecs=vorbis".to_string(),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime())
    }
}

impl FromStr for ContentType {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || STTError::ConfigurationError(format!("Unsupported content type: {s}"));

        let mut parts = s.split(';').map(str::trim);
        let base = parts.next().unwrap_or_default().to_ascii_lowercase();
        let mut rate = None;
        let mut channels = None;
        let mut codecs = None;
        for param in parts {
            let (key, value) = param.split_once('=').ok_or_else(invalid)?;
            match key.trim().to_ascii_lowercase().as_str() {
                "rate" => rate = Some(value.trim().parse::<u32>().map_err(|_| invalid())?),
                "channels" => channels = Some(value.trim().parse::<u8>().map_err(|_| invalid())?),
                "codecs" => codecs = Some(value.trim().to_ascii_lowercase()),
                _ => return Err(invalid()),
            }
        }

        let content_type = match (base.as_str(), codecs.as_deref()) {
            ("application/octet-stream", None) => Self::OctetStream,
            ("audio/basic", None) => Self::Basic,
            ("audio/flac", None) => Self::Flac,
            ("audio/l16", None) => Self::L16 {
                rate: rate.ok_or_else(invalid)?,
                channels,
            },
            ("audio/mp3", None) => Self::Mp3,
            ("audio/mpeg", None) => Self::Mpeg,
            ("audio/mulaw", None) => Self::Mulaw {
                rate: rate.ok_or_else(invalid)?,
            },
            ("audio/alaw", None) => Self::Alaw {
                rate: rate.ok_or_else(invalid)?,
            },
            ("audio/ogg", None) => Self::Ogg,
            ("audio/ogg", Some("opus")) => Self::OggOpus,
            ("audio/ogg", Some("vorbis")) => Self::OggVorbis,
            ("audio/wav", None) => Self::Wav,
            ("audio/webm", None) => Self::Webm,
            ("audio/webm", Some("opus")) => Self::WebmOpus,
            ("audio/webm", Some("vorbis")) => Self::WebmVorbis,
            _ => return Err(invalid()),
        };
        Ok(content_type)
    }
}

impl TryFrom<String> for ContentType {
    type Error = STTError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentType> for String {
    fn from(value: ContentType) -> Self {
        value.mime()
    }
}

// =============================================================================
// Connection query parameters
// =============================================================================

/// Settings that apply to every request on a connection. Sent in the URL
/// query string.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParameters {
    /// Recognition model.
    pub model: IbmModel,
    /// Custom language model GUID.
    pub language_customization_id: Option<String>,
    /// Custom acoustic model GUID.
    pub acoustic_customization_id: Option<String>,
    /// Base model version to use with an upgraded custom model.
    pub base_model_version: Option<String>,
    /// Ask IBM not to log request data for service improvement.
    pub learning_opt_out: bool,
    /// Customer id associated with the submitted data.
    pub customer_id: Option<String>,
    /// Legacy token passed as `watson-token` instead of a header.
    pub watson_token: Option<String>,
}

impl QueryParameters {
    pub fn to_query_string(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());

        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }

        if let Some(token) = non_empty(&self.watson_token) {
            query.append_pair("watson-token", token);
        }
        query.append_pair("model", self.model.as_str());
        if let Some(id) = non_empty(&self.language_customization_id) {
            query.append_pair("language_customization_id", id);
        }
        if let Some(id) = non_empty(&self.acoustic_customization_id) {
            query.append_pair("acoustic_customization_id", id);
        }
        if let Some(version) = non_empty(&self.base_model_version) {
            query.append_pair("base_model_version", version);
        }
        if self.learning_opt_out {
            query.append_pair("x-watson-learning-opt-out", "true");
        }
        if let Some(customer_id) = non_empty(&self.customer_id) {
            query.append_pair("x-watson-metadata", &format!("customer_id={customer_id}"));
        }

        query.finish()
    }
}

// =============================================================================
// Recognition parameters (start message)
// =============================================================================

/// Per-request recognition settings carried by the `start` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionParameters {
    /// Seconds of silence after which the service closes the connection.
    /// `-1` disables the timeout.
    pub inactivity_timeout: i32,
    pub interim_results: bool,
    pub max_alternatives: u32,
    /// Replace profanity with asterisks (US English only).
    pub profanity_filter: bool,
    pub word_confidence: bool,
    pub timestamps: bool,
    pub smart_formatting: bool,
    pub speaker_labels: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub customization_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_alternatives_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_phrase_silence_time: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub split_transcript_at_phrase_end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_audio_suppression: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_detector_sensitivity: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub low_latency: bool,
}

impl Default for RecognitionParameters {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            interim_results: false,
            max_alternatives: 1,
            profanity_filter: true,
            word_confidence: false,
            timestamps: false,
            smart_formatting: false,
            speaker_labels: false,
            customization_weight: None,
            keywords: None,
            keywords_threshold: None,
            word_alternatives_threshold: None,
            end_of_phrase_silence_time: None,
            split_transcript_at_phrase_end: false,
            background_audio_suppression: None,
            speech_detector_sensitivity: None,
            low_latency: false,
        }
    }
}

impl RecognitionParameters {
    /// Check the constraints the service enforces on request parameters.
    pub fn validate(&self) -> Result<(), STTError> {
        fn unit_range(name: &str, value: Option<f64>) -> Result<(), STTError> {
            match value {
                Some(v) if !(0.0..=1.0).contains(&v) => Err(STTError::ConfigurationError(
                    format!("{name} must be between 0.0 and 1.0 (got {v})"),
                )),
                _ => Ok(()),
            }
        }

        if self.inactivity_timeout == 0 || self.inactivity_timeout < -1 {
            return Err(STTError::ConfigurationError(format!(
                "inactivity_timeout must be positive or -1 (got {})",
                self.inactivity_timeout
            )));
        }
        if self.max_alternatives == 0 {
            return Err(STTError::ConfigurationError(
                "max_alternatives must be at least 1".to_string(),
            ));
        }

        let keyword_count = self.keywords.as_ref().map_or(0, Vec::len);
        match (keyword_count, self.keywords_threshold) {
            (0, Some(_)) => {
                return Err(STTError::ConfigurationError(
                    "keywords_threshold requires at least one keyword".to_string(),
                ));
            }
            (n, None) if n > 0 => {
                return Err(STTError::ConfigurationError(
                    "keywords require a keywords_threshold".to_string(),
                ));
            }
            (n, _) if n > MAX_KEYWORDS => {
                return Err(STTError::ConfigurationError(format!(
                    "at most {MAX_KEYWORDS} keywords can be spotted (got {n})"
                )));
            }
            _ => {}
        }

        unit_range("customization_weight", self.customization_weight)?;
        unit_range("keywords_threshold", self.keywords_threshold.map(f64::from))?;
        unit_range(
            "word_alternatives_threshold",
            self.word_alternatives_threshold.map(f64::from),
        )?;
        unit_range(
            "background_audio_suppression",
            self.background_audio_suppression.map(f64::from),
        )?;
        unit_range(
            "speech_detector_sensitivity",
            self.speech_detector_sensitivity.map(f64::from),
        )?;
        if let Some(t) = self.end_of_phrase_silence_time {
            if !(0.0..=120.0).contains(&t) {
                return Err(STTError::ConfigurationError(format!(
                    "end_of_phrase_silence_time must be between 0.0 and 120.0 (got {t})"
                )));
            }
        }
        Ok(())
    }
}

/// Control messages sent over the socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlMessage<'a> {
    Start {
        #[serde(rename = "content-type")]
        content_type: String,
        #[serde(flatten)]
        parameters: &'a RecognitionParameters,
    },
    Stop,
}

// =============================================================================
// IBM Watson STT Configuration
// =============================================================================

/// IBM Watson Speech-to-Text configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IbmWatsonSTTConfig {
    /// Where to connect.
    pub endpoint: IbmEndpoint,
    /// Connection-wide settings (model, customizations).
    pub query: QueryParameters,
    /// Format of the submitted audio.
    pub content_type: ContentType,
    /// Per-request recognition settings.
    pub recognition: RecognitionParameters,
    /// Session timeouts and limits.
    #[serde(skip)]
    pub session: SessionConfig,
}

impl IbmWatsonSTTConfig {
    pub fn validate(&self) -> Result<(), STTError> {
        self.endpoint.recognize_url()?;
        self.recognition.validate()
    }

    /// Build the WebSocket URL for connecting to IBM Watson STT.
    pub fn build_websocket_url(&self) -> Result<String, STTError> {
        let base_url = self.endpoint.recognize_url()?;
        let mut url = url::Url::parse(&base_url).map_err(|e| {
            STTError::ConfigurationError(format!("Invalid recognize URL {base_url}: {e}"))
        })?;

        let query = self.query.to_query_string();
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{query}"),
            _ => query,
        };
        url.set_query(Some(&query));
        Ok(url.into())
    }

    /// The `start` message opening a recognition request.
    pub fn start_message(&self) -> Result<OutboundFrame, STTError> {
        let message = ControlMessage::Start {
            content_type: self.content_type.mime(),
            parameters: &self.recognition,
        };
        OutboundFrame::json(&message)
            .map_err(|e| STTError::ConfigurationError(format!("Failed to encode start message: {e}")))
    }

    /// The `stop` message ending a recognition request.
    pub fn stop_message() -> OutboundFrame {
        OutboundFrame::text(r#"{"action":"stop"}"#)
    }
}

// =============================================================================
// Tests
// =============================================================================
