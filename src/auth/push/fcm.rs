use super::oauth::{ServiceAccountKey, ServiceAccountTokens};
use super::{DeliveryReceipt, PushError, PushMessage, PushProvider};
use crate::APP_USER_AGENT;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, error, instrument};
use url::Url;

pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com";

/// How the provider authenticates to FCM.
#[derive(Clone, Debug)]
pub enum FcmCredentials {
    /// Fixed bearer token. It is never refreshed.
    AccessToken(SecretString),
    /// Tokens minted from a service-account key and refreshed before expiry.
    ServiceAccount(ServiceAccountKey),
}

#[derive(Clone, Debug)]
pub struct FcmConfig {
    endpoint: String,
    project_id: String,
    credentials: FcmCredentials,
}

impl FcmConfig {
    #[must_use]
    pub fn new(project_id: String, credentials: FcmCredentials) -> Self {
        Self {
            endpoint: DEFAULT_FCM_ENDPOINT.to_string(),
            project_id,
            credentials,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

#[derive(Debug)]
enum TokenSource {
    Static(SecretString),
    ServiceAccount(ServiceAccountTokens),
}

impl TokenSource {
    async fn token(&self) -> Result<SecretString, PushError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccount(tokens) => tokens.access_token().await,
        }
    }

    async fn invalidate(&self) {
        if let Self::ServiceAccount(tokens) = self {
            tokens.invalidate().await;
        }
    }
}

/// Firebase Cloud Messaging over the HTTP v1 API.
#[derive(Debug)]
pub struct FcmPushProvider {
    client: Client,
    send_url: Url,
    tokens: TokenSource,
}

impl FcmPushProvider {
    /// # Errors
    /// Returns an error if the endpoint is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(config: FcmConfig) -> Result<Self> {
        let base = Url::parse(config.endpoint()).context("invalid FCM endpoint")?;
        let send_url = base
            .join(&format!("/v1/projects/{}/messages:send", config.project_id()))
            .context("failed to build FCM send URL")?;

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        let tokens = match config.credentials {
            FcmCredentials::AccessToken(token) => TokenSource::Static(token),
            FcmCredentials::ServiceAccount(key) => {
                TokenSource::ServiceAccount(ServiceAccountTokens::new(client.clone(), key))
            }
        };

        Ok(Self {
            client,
            send_url,
            tokens,
        })
    }
}

fn payload(address: &str, message: &PushMessage) -> Value {
    json!({
        "message": {
            "token": address,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            // FCM only accepts string values in the data map
            "data": message.data,
        }
    })
}

/// Map an FCM error response to the push error taxonomy.
///
/// Only an `UNREGISTERED` token or an `INVALID_ARGUMENT` that names
/// `message.token` blames the device address. Everything else, including a
/// bare 404 or a bad payload field, is a provider failure.
fn classify_error(status: StatusCode, body: &Value) -> PushError {
    let error = &body["error"];
    let fcm_status = error["status"].as_str().unwrap_or_default();
    let details = error["details"].as_array().map(Vec::as_slice).unwrap_or_default();

    let error_code = details
        .iter()
        .find_map(|detail| detail["errorCode"].as_str())
        .unwrap_or_default();
    let token_violation = details.iter().any(|detail| {
        detail["fieldViolations"].as_array().is_some_and(|violations| {
            violations
                .iter()
                .any(|violation| violation["field"].as_str() == Some("message.token"))
        })
    });
    let invalid_argument = error_code == "INVALID_ARGUMENT" || fcm_status == "INVALID_ARGUMENT";

    let detail = error["message"]
        .as_str()
        .filter(|message| !message.is_empty())
        .map_or_else(|| status.to_string(), ToString::to_string);

    if error_code == "UNREGISTERED" {
        PushError::InvalidAddress(format!("UNREGISTERED: {detail}"))
    } else if invalid_argument && token_violation {
        PushError::InvalidAddress(format!("INVALID_ARGUMENT: {detail}"))
    } else if error_code.is_empty() {
        PushError::Provider(format!("{status}: {detail}"))
    } else {
        PushError::Provider(format!("{status} {error_code}: {detail}"))
    }
}

#[async_trait]
impl PushProvider for FcmPushProvider {
    #[instrument(skip(self, address, message), fields(title = %message.title))]
    async fn send(
        &self,
        address: &str,
        message: &PushMessage,
    ) -> Result<DeliveryReceipt, PushError> {
        let access_token = self.tokens.token().await?;

        let response = self
            .client
            .post(self.send_url.as_str())
            .bearer_auth(access_token.expose_secret())
            .json(&payload(address, message))
            .send()
            .await
            .map_err(|e| {
                error!("FCM request failed: {e}");
                PushError::Provider(e.to_string())
            })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }

        if !status.is_success() {
            let err = classify_error(status, &body);
            error!(status = %status, "FCM send rejected: {err}");
            return Err(err);
        }

        let message_id = body["name"]
            .as_str()
            .ok_or_else(|| PushError::Provider("FCM response without message name".to_string()))?
            .to_string();

        debug!(message_id = %message_id, "FCM accepted message");

        Ok(DeliveryReceipt {
            message_id,
            sent_at: Utc::now(),
        })
    }
}
