//! Credentials for the recognition endpoint.
//!
//! A session asks its [`CredentialProvider`] for a bearer token right before
//! the handshake. Token acquisition lives outside the session so it can be
//! cached and refreshed independently of any single connection.

mod iam;

pub use iam::{DEFAULT_IAM_URL, IamTokenProvider};

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors raised while obtaining a credential.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential configured.
    #[error("Missing credential: {0}")]
    Missing(String),

    /// The token service could not be reached.
    #[error("Token request failed: {0}")]
    Request(String),

    /// The token service refused the API key.
    #[error("Token request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The token service answered with something unexpected.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Supplies the bearer token placed in the `Authorization` header.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a token valid for at least the duration of a handshake.
    async fn token(&self) -> AuthResult<Zeroizing<String>>;
}

/// A fixed, pre-acquired access token.
pub struct StaticToken {
    token: Zeroizing<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").field("token", &"[REDACTED]").finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> AuthResult<Zeroizing<String>> {
        if self.token.is_empty() {
            return Err(AuthError::Missing("access token is empty".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// Format the `Authorization` header value for `token`.
pub(crate) fn bearer(token: &str) -> Zeroizing<String> {
    Zeroizing::new(format!("Bearer {token}"))
}
