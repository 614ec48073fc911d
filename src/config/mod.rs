//! Client configuration.
//!
//! Values come from .env files, environment variables and an optional YAML
//! file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use watson_stream::config::ClientConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(Path::new("watson.yaml"))?;
//! println!("Recognizing with {}", config.query.model);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use zeroize::Zeroizing;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::auth::{AuthError, IamTokenProvider};
use crate::core::session::SessionConfig;
use crate::core::stt::ibm_watson::{
    ContentType, IbmEndpoint, IbmWatsonSTTConfig, QueryParameters, RecognitionParameters,
};
use crate::utils::UrlValidationError;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("Invalid URL in {key}: {source}")]
    Url {
        key: &'static str,
        #[source]
        source: UrlValidationError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Credential(#[from] AuthError),
}

/// Complete client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// IBM Cloud API key exchanged for IAM tokens.
    pub api_key: Zeroizing<String>,
    /// IAM token endpoint.
    pub iam_url: String,
    pub endpoint: IbmEndpoint,
    pub query: QueryParameters,
    pub content_type: ContentType,
    pub recognition: RecognitionParameters,
    pub session: SessionConfig,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"[REDACTED]")
            .field("iam_url", &self.iam_url)
            .field("endpoint", &self.endpoint)
            .field("query", &self.query)
            .field("content_type", &self.content_type)
            .field("recognition", &self.recognition)
            .field("session", &self.session)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// The binary loads `.env` into the environment before calling this, so
    /// real environment variables override `.env` values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(env::EnvConfig::from_env()?, None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge::merge_config(env::EnvConfig::from_env()?, Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// [`ClientConfig::from_file`] when a path is given, else
    /// [`ClientConfig::from_env`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Provider configuration for [`crate::core::stt::IbmWatsonSTT`].
    pub fn stt_config(&self) -> IbmWatsonSTTConfig {
        IbmWatsonSTTConfig {
            endpoint: self.endpoint.clone(),
            query: self.query.clone(),
            content_type: self.content_type,
            recognition: self.recognition.clone(),
            session: self.session.clone(),
        }
    }

    /// IAM token provider for the configured API key.
    pub fn credentials(&self) -> Result<IamTokenProvider, ConfigError> {
        Ok(IamTokenProvider::with_url(
            self.api_key.as_str(),
            self.iam_url.as_str(),
        )?)
    }
}
