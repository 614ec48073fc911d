pub mod auth;
pub mod config;
pub mod core;
pub mod utils;

// Re-export commonly used items for convenience
pub use auth::{AuthError, AuthResult, CredentialProvider, IamTokenProvider, StaticToken};
pub use config::{ClientConfig, ConfigError};
pub use core::*;
