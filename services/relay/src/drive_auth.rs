//! Service-account authentication for the Drive API.
//!
//! A signed RS256 assertion is exchanged for an OAuth access token at the
//! key's token URI. Tokens are cached and re-exchanged shortly before expiry.

use crate::config::DriveConfig;
use crate::drive_uploader::DriveError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// OAuth grant type for signed JWT assertions
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// Fields used from a Google service-account JSON key
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[redacted]")
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, DriveError> {
        serde_json::from_str(json).map_err(|e| DriveError::InvalidKey(e.to_string()))
    }

    pub async fn from_file(path: &Path) -> Result<Self, DriveError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            DriveError::InvalidKey(format!(
                "failed to read key file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Resolve the key from configuration.
    ///
    /// Inline JSON wins over a key file. Returns `None` when neither is set.
    pub async fn from_config(config: &DriveConfig) -> Result<Option<Self>, DriveError> {
        if let Some(json) = config.service_account_key.as_deref() {
            info!("Loading service account key from inline JSON");
            return Self::from_json(json).map(Some);
        }

        if let Some(path) = config.service_account_key_path.as_deref() {
            info!(path = %path.display(), "Loading service account key from file");
            return Self::from_file(path).await.map(Some);
        }

        Ok(None)
    }
}

/// Source of bearer tokens for Drive requests
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, DriveError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

/// Token source backed by a service-account key
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    scope: String,
    http: reqwest::Client,
    encoding_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokens {
    pub fn new(
        key: ServiceAccountKey,
        scope: String,
        http: reqwest::Client,
    ) -> Result<Self, DriveError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| DriveError::InvalidKey(format!("private key is not a usable RSA PEM: {e}")))?;

        Ok(Self {
            key,
            scope,
            http,
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    /// Signed assertion valid from `now` for one hour
    fn assertion(&self, now: DateTime<Utc>) -> Result<String, DriveError> {
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| DriveError::Auth(format!("failed to sign assertion: {e}")))
    }

    async fn exchange(&self) -> Result<CachedToken, DriveError> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Auth(format!(
                "token endpoint returned {}: {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);

        debug!(
            client_email = %self.key.client_email,
            expires_in = lifetime,
            "Obtained Drive access token"
        );

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + ChronoDuration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, DriveError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let token = self.exchange().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}
