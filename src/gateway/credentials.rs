use std::{
    fmt,
    path::Path,
    time::{Duration, Instant},
};

use jwt_simple::prelude::{
    Claims, Duration as JwtDuration, RS256KeyPair, RSAKeyPairLike,
};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{config::CredentialsSource, error::GatewayError};

const VISION_SCOPE: &str = "https://www.googleapis.com/auth/cloud-vision";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a Google service account key file we need.
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
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, GatewayError> {
        let json = std::fs::read_to_string(path).map_err(|err| {
            GatewayError::Credentials(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(json)
            .map_err(|err| GatewayError::Credentials(format!("malformed key file: {err}")))
    }
}

#[derive(Serialize, Deserialize)]
struct ScopeClaim {
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

/// Exchanges signed JWT assertions for OAuth2 access tokens and caches them.
pub struct ServiceAccountTokens {
    key: ServiceAccountKey,
    key_pair: RS256KeyPair,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

impl ServiceAccountTokens {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Result<Self, GatewayError> {
        let mut key_pair = RS256KeyPair::from_pem(&key.private_key)
            .map_err(|err| GatewayError::Credentials(format!("invalid private key: {err}")))?;
        if let Some(kid) = &key.private_key_id {
            key_pair = key_pair.with_key_id(kid);
        }
        Ok(Self {
            key,
            key_pair,
            http,
            cached: Mutex::new(None),
        })
    }

    /// Returns a valid access token. Concurrent callers wait on a single refresh.
    pub async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self.fetch().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn assertion(&self) -> Result<String, GatewayError> {
        let claims = Claims::with_custom_claims(
            ScopeClaim {
                scope: VISION_SCOPE.to_string(),
            },
            JwtDuration::from_hours(1),
        )
        .with_issuer(&self.key.client_email)
        .with_audience(&self.key.token_uri);

        self.key_pair
            .sign(claims)
            .map_err(|err| GatewayError::Credentials(format!("cannot sign assertion: {err}")))
    }

    async fn fetch(&self) -> Result<AccessToken, GatewayError> {
        let assertion = self.assertion()?;
        let requested_at = Instant::now();

        tracing::debug!(client_email = %self.key.client_email, "requesting access token");
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            // the token endpoint answers 400/401 for any rejected assertion
            return Err(match status.as_u16() {
                s @ (400..=499) if s != 429 => GatewayError::Unauthorized {
                    status: s,
                    message: body,
                },
                s => GatewayError::from_status(s, body),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| GatewayError::InvalidResponse(format!("token response: {err}")))?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at: requested_at + Duration::from_secs(token.expires_in),
        })
    }
}

/// How outgoing label requests are authorized.
pub enum Credentials {
    ApiKey(String),
    ServiceAccount(ServiceAccountTokens),
}

impl Credentials {
    pub fn load(source: &CredentialsSource, http: reqwest::Client) -> Result<Self, GatewayError> {
        match source {
            CredentialsSource::ApiKey(key) => Ok(Credentials::ApiKey(key.clone())),
            CredentialsSource::ServiceAccountFile(path) => {
                let key = ServiceAccountKey::from_file(path)?;
                tracing::info!(client_email = %key.client_email, "loaded service account key");
                Ok(Credentials::ServiceAccount(ServiceAccountTokens::new(key, http)?))
            }
        }
    }

    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, GatewayError> {
        match self {
            Credentials::ApiKey(key) => Ok(request.query(&[("key", key)])),
            Credentials::ServiceAccount(tokens) => {
                Ok(request.bearer_auth(tokens.access_token().await?))
            }
        }
    }
}
