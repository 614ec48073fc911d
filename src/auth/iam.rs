//! IBM Cloud IAM token provider.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::form_urlencoded;
use zeroize::Zeroizing;

use super::{AuthError, AuthResult, CredentialProvider};

/// IBM Cloud IAM token endpoint.
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// Refresh this long before the advertised expiry.
const SAFETY_MARGIN_SECS: u64 = 300;

#[derive(Clone)]
struct CachedToken {
    access_token: Zeroizing<String>,
    expires_at: Instant,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }
}

/// How long a token advertised as valid for `expires_in` seconds is reused.
/// Short-lived tokens are refreshed halfway through their lifetime.
fn cache_lifetime(expires_in: u64) -> Duration {
    let margin = SAFETY_MARGIN_SECS.min(expires_in / 2);
    Duration::from_secs(expires_in - margin)
}

#[derive(serde::Deserialize)]
struct IamTokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    expires_in: u64,
}

/// Exchanges an API key for an IAM bearer token and caches it until shortly
/// before it expires.
pub struct IamTokenProvider {
    api_key: Zeroizing<String>,
    url: String,
    client: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl IamTokenProvider {
    pub fn new(api_key: impl Into<String>) -> AuthResult<Self> {
        Self::with_url(api_key, DEFAULT_IAM_URL)
    }

    /// Use a non-default token endpoint (private IAM endpoints, tests).
    pub fn with_url(api_key: impl Into<String>, url: impl Into<String>) -> AuthResult<Self> {
        let api_key = Zeroizing::new(api_key.into());
        if api_key.is_empty() {
            return Err(AuthError::Missing("API key is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AuthError::Request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            url: url.into(),
            client,
            cached: RwLock::new(None),
        })
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn fetch(&self) -> AuthResult<CachedToken> {
        let encoded_api_key: Zeroizing<String> = Zeroizing::new(
            form_urlencoded::byte_serialize(self.api_key.as_bytes()).collect(),
        );
        let body = Zeroizing::new(format!(
            "grant_type=urn:ibm:params:oauth:grant-type:apikey&apikey={}",
            encoded_api_key.as_str()
        ));

        debug!("Requesting IAM token from {}", self.url);
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: IamTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }

        info!("Obtained IAM token valid for {}s", token.expires_in);

        Ok(CachedToken {
            access_token: Zeroizing::new(token.access_token),
            expires_at: Instant::now() + cache_lifetime(token.expires_in),
        })
    }
}

impl std::fmt::Debug for IamTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamTokenProvider")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for IamTokenProvider {
    async fn token(&self) -> AuthResult<Zeroizing<String>> {
        {
            let guard = self.cached.read().await;
            if let Some(token) = guard.as_ref() {
                if !token.is_expired() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut guard = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = guard.as_ref() {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch().await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }
}
