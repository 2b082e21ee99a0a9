//! Access tokens for Google APIs.
//!
//! Service accounts sign a JWT-bearer assertion and exchange it for a short
//! lived access token. Tokens are cached per impersonated subject and refreshed
//! five minutes before they expire.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fsio_core::FsError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Full read/write access to Drive files.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
/// Read-only access to the users of administered domains.
pub const DIRECTORY_USER_SCOPE: &str =
    "https://www.googleapis.com/auth/admin.directory.user.readonly";
/// Read-only access to the administered domains.
pub const DIRECTORY_DOMAIN_SCOPE: &str =
    "https://www.googleapis.com/auth/admin.directory.domain.readonly";

/// Every scope the Drive backend can use.
pub const SCOPES: &[&str] = &[DRIVE_SCOPE, DIRECTORY_USER_SCOPE, DIRECTORY_DOMAIN_SCOPE];

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Source of bearer tokens, optionally impersonating `subject`.
///
/// `None` means the provider's default identity.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, subject: Option<&str>) -> Result<String, FsError>;
}

/// The fields of a service-account JSON key file that signing needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, FsError> {
        serde_json::from_str(json)
            .map_err(|e| FsError::Config(format!("invalid service account key: {e}")))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FsError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Cached token with expiration.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at - chrono::Duration::minutes(5)
    }
}

/// Tokens minted from a service-account key, with domain-wide delegation
/// when a subject is given.
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    scopes: Vec<String>,
    default_subject: Option<String>,
    http: reqwest::Client,
    cache: DashMap<String, CachedToken>,
}

impl std::fmt::Debug for ServiceAccountTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokens")
            .field("key", &self.key)
            .field("scopes", &self.scopes)
            .field("default_subject", &self.default_subject)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey, scopes: &[&str], default_subject: Option<String>) -> Self {
        Self {
            key,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            default_subject,
            http: reqwest::Client::new(),
            cache: DashMap::new(),
        }
    }

    fn assertion(&self, subject: Option<&str>) -> Result<String, FsError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: self.scopes.join(" "),
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            sub: subject,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| FsError::Config(format!("invalid service account private key: {e}")))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| FsError::Remote(format!("failed to sign token assertion: {e}")))
    }

    async fn exchange(&self, subject: Option<&str>) -> Result<CachedToken, FsError> {
        let assertion = self.assertion(subject)?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| FsError::Remote(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FsError::Remote(format!(
                "token exchange for {} failed: {} {}",
                subject.unwrap_or(&self.key.client_email),
                status,
                body
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| FsError::Remote(format!("invalid token response: {e}")))?;
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn token(&self, subject: Option<&str>) -> Result<String, FsError> {
        let subject = subject.or(self.default_subject.as_deref());
        let cache_key = subject.unwrap_or_default().to_string();

        if let Some(cached) = self.cache.get(&cache_key) {
            if !cached.is_expired() {
                debug!(subject = %cache_key, "token cache hit");
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.exchange(subject).await?;
        info!(subject = %cache_key, expires_at = %fresh.expires_at, "minted access token");
        let access_token = fresh.access_token.clone();
        self.cache.insert(cache_key, fresh);
        Ok(access_token)
    }
}

/// A fixed token for every subject.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _subject: Option<&str>) -> Result<String, FsError> {
        Ok(self.0.clone())
    }
}
