use serde::Deserialize;
use std::path::Path;

use super::ConfigError;
use crate::core::stt::ibm_watson::{LegacyHost, RecognitionParameters};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// credentials:
///   api_key: "your-api-key"
///   iam_url: "https://iam.cloud.ibm.com/identity/token"
///
/// endpoint:
///   region: "eu-de"
///   instance_id: "your-instance-id"
///   # legacy_host: "germany"
///   # url: "wss://private.example.com/v1/recognize"
///
/// query:
///   model: "en-US_BroadbandModel"
///   language_customization_id: "custom-lm-guid"
///   learning_opt_out: true
///
/// content_type: "audio/l16;rate=16000;channels=1"
///
/// recognition:
///   interim_results: true
///   inactivity_timeout: -1
///   keywords: ["invoice", "refund"]
///   keywords_threshold: 0.5
///
/// session:
///   connect_timeout_secs: 10
///   drain_timeout_secs: 30
///   receiver_exit_timeout_secs: 30
///   close_timeout_secs: 5
///   max_message_size: 1048576
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct YamlConfig {
    pub credentials: Option<CredentialsYaml>,
    pub endpoint: Option<EndpointYaml>,
    pub query: Option<QueryYaml>,
    pub content_type: Option<String>,
    pub recognition: Option<RecognitionParameters>,
    pub session: Option<SessionYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsYaml {
    pub api_key: Option<String>,
    pub iam_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointYaml {
    pub region: Option<String>,
    pub instance_id: Option<String>,
    pub legacy_host: Option<LegacyHost>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct QueryYaml {
    pub model: Option<String>,
    pub language_customization_id: Option<String>,
    pub acoustic_customization_id: Option<String>,
    pub base_model_version: Option<String>,
    pub learning_opt_out: Option<bool>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub connect_timeout_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
    pub receiver_exit_timeout_secs: Option<u64>,
    pub close_timeout_secs: Option<u64>,
    pub max_message_size: Option<usize>,
}

impl YamlConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
credentials:
  api_key: "key-123"
endpoint:
  region: "eu-de"
  instance_id: "inst-1"
query:
  model: "en-US_BroadbandModel"
  learning_opt_out: true
content_type: "audio/flac"
recognition:
  interim_results: true
  keywords: ["refund"]
  keywords_threshold: 0.4
session:
  drain_timeout_secs: 12
"#;
        let config = YamlConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.credentials.unwrap().api_key.as_deref(),
            Some("key-123")
        );
        let endpoint = config.endpoint.unwrap();
        assert_eq!(endpoint.region.as_deref(), Some("eu-de"));
        assert_eq!(endpoint.instance_id.as_deref(), Some("inst-1"));
        assert_eq!(config.query.unwrap().learning_opt_out, Some(true));
        assert_eq!(config.content_type.as_deref(), Some("audio/flac"));

        let recognition = config.recognition.unwrap();
        assert!(recognition.interim_results);
        assert_eq!(recognition.max_alternatives, 1);
        assert!(recognition.profanity_filter);
        assert_eq!(config.session.unwrap().drain_timeout_secs, Some(12));
    }

    #[test]
    fn test_parse_legacy_host() {
        let config = YamlConfig::from_yaml_str("endpoint:\n  legacy_host: sydney-ap-north\n").unwrap();
        assert_eq!(
            config.endpoint.unwrap().legacy_host,
            Some(LegacyHost::SydneyApNorth)
        );
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = YamlConfig::from_yaml_str("{}").unwrap();
        assert!(config.credentials.is_none());
        assert!(config.session.is_none());
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(matches!(
            YamlConfig::from_yaml_str("server:\n  port: 3001\n"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
