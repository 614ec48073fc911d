use std::time::Duration;

use zeroize::Zeroizing;

use super::ClientConfig;
use super::ConfigError;
use super::env::EnvConfig;
use super::yaml::YamlConfig;
use crate::auth::DEFAULT_IAM_URL;
use crate::core::session::SessionConfig;
use crate::core::stt::ibm_watson::{ContentType, IbmEndpoint, IbmModel, IbmRegion, QueryParameters};

/// Combine environment values (base) with YAML overrides and defaults.
pub(crate) fn merge_config(
    env: EnvConfig,
    yaml: Option<YamlConfig>,
) -> Result<ClientConfig, ConfigError> {
    let yaml = yaml.unwrap_or_default();
    let credentials = yaml.credentials.unwrap_or_default();
    let endpoint = yaml.endpoint.unwrap_or_default();
    let query = yaml.query.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();

    let api_key = credentials.api_key.or(env.api_key).unwrap_or_default();
    let iam_url = credentials
        .iam_url
        .or(env.iam_url)
        .unwrap_or_else(|| DEFAULT_IAM_URL.to_string());

    let endpoint = match (endpoint.url.or(env.endpoint_url), endpoint.legacy_host) {
        (Some(url), _) => IbmEndpoint::Url(url),
        (None, Some(host)) => IbmEndpoint::Legacy(host),
        (None, None) => {
            let region = match endpoint.region.or(env.region) {
                Some(raw) => raw.parse::<IbmRegion>().map_err(|e| ConfigError::InvalidValue {
                    key: "WATSON_REGION",
                    message: e.to_string(),
                })?,
                None => IbmRegion::default(),
            };
            IbmEndpoint::Instance {
                region,
                instance_id: endpoint
                    .instance_id
                    .or(env.instance_id)
                    .unwrap_or_default(),
            }
        }
    };

    let model = query
        .model
        .or(env.model)
        .map(|name| name.parse::<IbmModel>().unwrap_or_else(|never| match never {}))
        .unwrap_or_default();

    let content_type = match yaml.content_type.or(env.content_type) {
        Some(raw) => raw
            .parse::<ContentType>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "WATSON_CONTENT_TYPE",
                message: e.to_string(),
            })?,
        None => ContentType::default(),
    };

    let defaults = SessionConfig::default();
    let secs = |yaml: Option<u64>, env: Option<u64>, default: Duration| {
        yaml.or(env).map(Duration::from_secs).unwrap_or(default)
    };
    let session = SessionConfig {
        max_message_size: session
            .max_message_size
            .or(env.max_message_size)
            .unwrap_or(defaults.max_message_size),
        connect_timeout: secs(
            session.connect_timeout_secs,
            env.connect_timeout_secs,
            defaults.connect_timeout,
        ),
        drain_timeout: secs(
            session.drain_timeout_secs,
            env.drain_timeout_secs,
            defaults.drain_timeout,
        ),
        close_timeout: secs(session.close_timeout_secs, None, defaults.close_timeout),
        receiver_exit_timeout: secs(
            session.receiver_exit_timeout_secs,
            env.receiver_exit_timeout_secs,
            defaults.receiver_exit_timeout,
        ),
    };

    Ok(ClientConfig {
        api_key: Zeroizing::new(api_key),
        iam_url,
        endpoint,
        query: QueryParameters {
            model,
            language_customization_id: query.language_customization_id,
            acoustic_customization_id: query.acoustic_customization_id,
            base_model_version: query.base_model_version,
            learning_opt_out: query
                .learning_opt_out
                .or(env.learning_opt_out)
                .unwrap_or(false),
            customer_id: query.customer_id,
            watson_token: None,
        },
        content_type,
        recognition: yaml.recognition.unwrap_or_default(),
        session,
    })
}
