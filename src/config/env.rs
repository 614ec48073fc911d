use std::env;
use std::str::FromStr;

use super::ConfigError;

/// Values read from the process environment.
///
/// `.env` files are loaded into the environment by the binary before this
/// runs, so real environment variables take precedence over `.env` values.
#[derive(Debug, Default, Clone)]
pub(crate) struct EnvConfig {
    pub api_key: Option<String>,
    pub iam_url: Option<String>,
    pub instance_id: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub model: Option<String>,
    pub content_type: Option<String>,
    pub learning_opt_out: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
    pub receiver_exit_timeout_secs: Option<u64>,
    pub max_message_size: Option<usize>,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: env_string("WATSON_API_KEY"),
            iam_url: env_string("WATSON_IAM_URL"),
            instance_id: env_string("WATSON_INSTANCE_ID"),
            region: env_string("WATSON_REGION"),
            endpoint_url: env_string("WATSON_ENDPOINT_URL"),
            model: env_string("WATSON_MODEL"),
            content_type: env_string("WATSON_CONTENT_TYPE"),
            learning_opt_out: env_bool("WATSON_LEARNING_OPT_OUT")?,
            connect_timeout_secs: env_parse("WATSON_CONNECT_TIMEOUT_SECS")?,
            drain_timeout_secs: env_parse("WATSON_DRAIN_TIMEOUT_SECS")?,
            receiver_exit_timeout_secs: env_parse("WATSON_RECEIVER_EXIT_TIMEOUT_SECS")?,
            max_message_size: env_parse("WATSON_MAX_MESSAGE_SIZE")?,
        })
    }
}

/// Non-empty, trimmed value of `key`.
fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key,
                message: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}

fn env_bool(key: &'static str) -> Result<Option<bool>, ConfigError> {
    env_string(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key,
                message: format!("{raw:?} is not a boolean"),
            }),
        })
        .transpose()
}
