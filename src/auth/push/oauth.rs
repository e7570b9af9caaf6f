//! OAuth2 access tokens for FCM, minted from a Google service-account key.
//!
//! The key signs a short-lived RS256 assertion that is exchanged at the
//! key's `token_uri` for a bearer token. Tokens are cached and replaced a
//! minute before they expire.

use super::PushError;
use anyhow::{anyhow, Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{fmt, fs, path::Path};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECONDS: i64 = 3600;
const REFRESH_MARGIN_SECONDS: i64 = 60;

#[derive(Deserialize)]
struct RawServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

/// The fields of a service-account JSON key that token minting needs.
#[derive(Clone)]
pub struct ServiceAccountKey {
    client_email: String,
    private_key: SecretString,
    token_uri: String,
    project_id: Option<String>,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    /// # Errors
    /// Returns an error if the JSON lacks the key fields or the private key
    /// is not an RSA key.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawServiceAccountKey =
            serde_json::from_str(json).context("invalid service account JSON")?;
        decode_private_key(&raw.private_key)?;

        Ok(Self {
            client_email: raw.client_email,
            private_key: SecretString::from(raw.private_key),
            token_uri: raw
                .token_uri
                .filter(|uri| !uri.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            project_id: raw.project_id.filter(|id| !id.trim().is_empty()),
        })
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read service account file: {}", path.display()))?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn with_token_uri(mut self, token_uri: String) -> Self {
        self.token_uri = token_uri;
        self
    }

    #[must_use]
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    #[must_use]
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

#[derive(Serialize)]
struct AssertionHeader {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn decode_private_key(pem: &str) -> Result<RsaPrivateKey> {
    if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(key);
    }
    RsaPrivateKey::from_pkcs1_pem(pem).map_err(|_| anyhow!("failed to parse service account RSA key"))
}

/// RS256 assertion for the JWT bearer grant.
fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String> {
    let header = AssertionHeader {
        alg: "RS256",
        typ: "JWT",
    };
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: FCM_SCOPE,
        aud: &key.token_uri,
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ASSERTION_TTL_SECONDS)).timestamp(),
    };
    let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&claims)?);

    let private_key = decode_private_key(key.private_key.expose_secret())?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// Mints and caches FCM access tokens for one service account.
pub struct ServiceAccountTokens {
    client: Client,
    key: ServiceAccountKey,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for ServiceAccountTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountTokens")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokens {
    #[must_use]
    pub fn new(client: Client, key: ServiceAccountKey) -> Self {
        Self {
            client,
            key,
            cached: Mutex::new(None),
        }
    }

    /// A token valid for at least another minute, minting one if needed.
    ///
    /// # Errors
    /// `PushError::Provider` when signing or the token exchange fails.
    pub async fn access_token(&self) -> Result<SecretString, PushError> {
        // held across the exchange so concurrent sends share one mint
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(REFRESH_MARGIN_SECONDS) > now {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.mint(now).await.map_err(|err| {
            error!("failed to obtain FCM access token: {err:#}");
            PushError::Provider(format!("failed to obtain FCM access token: {err}"))
        })?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    /// Forget the cached token, e.g. after FCM answered 401.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn mint(&self, now: DateTime<Utc>) -> Result<CachedToken> {
        let assertion = sign_assertion(&self.key, now)?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("token endpoint answered {status}: {body}"));
        }

        let body: TokenResponse = response
            .json()
            .await
            .context("invalid token endpoint response")?;
        let expires_in = body.expires_in.unwrap_or(ASSERTION_TTL_SECONDS);

        info!(
            client_email = %self.key.client_email,
            expires_in,
            "minted FCM access token"
        );
        debug!(token_uri = %self.key.token_uri, "token exchange complete");

        Ok(CachedToken {
            token: SecretString::from(body.access_token),
            expires_at: now + Duration::seconds(expires_in),
        })
    }
}
