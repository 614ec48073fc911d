use std::time::Duration;

use super::{ClientConfig, ConfigError};
use crate::core::stt::ibm_watson::IbmEndpoint;
use crate::utils::url_validation::{validate_endpoint_url, validate_token_url};

/// Validate that the API key is present.
pub(crate) fn validate_api_key(api_key: &str) -> Result<(), ConfigError> {
    if api_key.trim().is_empty() {
        return Err(ConfigError::Missing("WATSON_API_KEY"));
    }
    Ok(())
}

/// Validate that the endpoint can be turned into a recognize URL.
pub(crate) fn validate_endpoint(endpoint: &IbmEndpoint) -> Result<(), ConfigError> {
    match endpoint {
        IbmEndpoint::Instance { instance_id, .. } if instance_id.trim().is_empty() => Err(
            ConfigError::Missing("WATSON_INSTANCE_ID or WATSON_ENDPOINT_URL"),
        ),
        IbmEndpoint::Url(url) => {
            validate_endpoint_url(url).map_err(|source| ConfigError::Url {
                key: "WATSON_ENDPOINT_URL",
                source,
            })?;
            Ok(())
        }
        _ => Ok(()),
    }
}

pub(crate) fn validate_iam_url(url: &str) -> Result<(), ConfigError> {
    validate_token_url(url).map_err(|source| ConfigError::Url {
        key: "WATSON_IAM_URL",
        source,
    })?;
    Ok(())
}

fn non_zero(key: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key,
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Validate session timeouts and limits.
pub(crate) fn validate_session(config: &ClientConfig) -> Result<(), ConfigError> {
    let session = &config.session;
    non_zero("WATSON_CONNECT_TIMEOUT_SECS", session.connect_timeout)?;
    non_zero("WATSON_DRAIN_TIMEOUT_SECS", session.drain_timeout)?;
    non_zero("WATSON_RECEIVER_EXIT_TIMEOUT_SECS", session.receiver_exit_timeout)?;
    non_zero("close_timeout_secs", session.close_timeout)?;
    if session.max_message_size == 0 {
        return Err(ConfigError::InvalidValue {
            key: "WATSON_MAX_MESSAGE_SIZE",
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Run every check on a merged configuration.
pub(crate) fn validate(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_api_key(&config.api_key)?;
    validate_endpoint(&config.endpoint)?;
    validate_iam_url(&config.iam_url)?;
    validate_session(config)?;
    config
        .recognition
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stt::ibm_watson::IbmRegion;

    #[test]
    fn test_api_key_required() {
        assert!(matches!(
            validate_api_key("  "),
            Err(ConfigError::Missing("WATSON_API_KEY"))
        ));
        assert!(validate_api_key("abc").is_ok());
    }

    #[test]
    fn test_instance_or_url_required() {
        let missing = IbmEndpoint::Instance {
            region: IbmRegion::UsSouth,
            instance_id: String::new(),
        };
        assert!(matches!(
            validate_endpoint(&missing),
            Err(ConfigError::Missing(_))
        ));
        assert!(validate_endpoint(&IbmEndpoint::Url("wss://example.com/recognize".into())).is_ok());
    }

    #[test]
    fn test_remote_plaintext_endpoint_rejected() {
        let endpoint = IbmEndpoint::Url("ws://example.com/recognize".into());
        assert!(matches!(
            validate_endpoint(&endpoint),
            Err(ConfigError::Url {
                key: "WATSON_ENDPOINT_URL",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(non_zero("X", Duration::ZERO).is_err());
        assert!(non_zero("X", Duration::from_millis(1)).is_ok());
    }
}
