//! Access tokens for the Sheets API.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use techfix_core::RowStoreError;
use tokio::sync::RwLock;
use tracing::debug;

/// Default GCE metadata-server token endpoint for the attached service account.
pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// OAuth token endpoint used when a key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Read/write access to spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for a signed assertion; Google caps it at one hour.
const ASSERTION_TTL_SECS: i64 = 3600;

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map_or(true, |at| at - Duration::seconds(EXPIRY_SKEW_SECS) > now)
    }
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn fetch(&self) -> Result<AccessToken, RowStoreError>;
}

/// Fixed bearer token, for local development and tests.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self) -> Result<AccessToken, RowStoreError> {
        if self.token.trim().is_empty() {
            return Err(RowStoreError::Auth("static token is empty".to_string()));
        }
        Ok(AccessToken {
            value: self.token.clone(),
            expires_at: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, origin: &str) -> Result<AccessToken, RowStoreError> {
        let expires_at = match self.expires_in {
            None => None,
            Some(secs) => Some(
                Duration::try_seconds(secs)
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or_else(|| {
                        RowStoreError::Decode(format!("{origin}: expires_in {secs} out of range"))
                    })?,
            ),
        };
        Ok(AccessToken {
            value: self.access_token,
            expires_at,
        })
    }
}

async fn read_token(response: reqwest::Response, origin: &str) -> Result<AccessToken, RowStoreError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(RowStoreError::Auth(format!(
            "{origin} returned {}: {message}",
            status.as_u16()
        )));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| RowStoreError::Decode(format!("{origin} token: {e}")))?;
    debug!(origin, expires_in = ?body.expires_in, "fetched access token");
    body.into_token(origin)
}

fn http_client() -> Result<Client, RowStoreError> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| RowStoreError::Transport(e.to_string()))
}

/// Service-account token from the compute metadata server.
#[derive(Debug, Clone)]
pub struct MetadataServerTokenSource {
    client: Client,
    endpoint: String,
}

impl MetadataServerTokenSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RowStoreError> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TokenSource for MetadataServerTokenSource {
    fn kind(&self) -> &'static str {
        "metadata_server"
    }

    async fn fetch(&self) -> Result<AccessToken, RowStoreError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| RowStoreError::Auth(format!("metadata server unreachable: {e}")))?;
        read_token(response, "metadata server").await
    }
}

/// Fields of a downloaded service-account JSON key that token minting needs.
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

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, RowStoreError> {
        serde_json::from_str(json)
            .map_err(|e| RowStoreError::Auth(format!("invalid service account key: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RowStoreError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RowStoreError::Auth(format!(
                "cannot read service account key {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Mints tokens from a service-account key with the OAuth JWT-bearer grant.
pub struct ServiceAccountTokenSource {
    client: Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    scope: String,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey) -> Result<Self, RowStoreError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| RowStoreError::Auth(format!("invalid service account private key: {e}")))?;
        Ok(Self {
            client: http_client()?,
            key,
            signing_key,
            scope: SHEETS_SCOPE.to_string(),
        })
    }

    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self, RowStoreError> {
        Self::new(ServiceAccountKey::from_file(path)?)
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// RS256-signed assertion for the token endpoint.
    fn assertion(&self, now: DateTime<Utc>) -> Result<String, RowStoreError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_TTL_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|e| RowStoreError::Auth(format!("cannot sign token assertion: {e}")))
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    fn kind(&self) -> &'static str {
        "service_account"
    }

    async fn fetch(&self) -> Result<AccessToken, RowStoreError> {
        let assertion = self.assertion(Utc::now())?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| RowStoreError::Auth(format!("token endpoint unreachable: {e}")))?;
        read_token(response, "token endpoint").await
    }
}

/// Caches the current token and re-authenticates on expiry or on request.
pub struct TokenCache {
    source: Box<dyn TokenSource>,
    current: RwLock<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            current: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }

    pub async fn bearer(&self) -> Result<String, RowStoreError> {
        let now = Utc::now();
        if let Some(token) = self.current.read().await.as_ref() {
            if token.is_fresh(now) {
                return Ok(token.value.clone());
            }
        }

        let mut current = self.current.write().await;
        if let Some(token) = current.as_ref() {
            if token.is_fresh(now) {
                return Ok(token.value.clone());
            }
        }
        let token = self.source.fetch().await?;
        let value = token.value.clone();
        *current = Some(token);
        Ok(value)
    }

    /// Drop the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }
}
