//! Push confirmation delivery.
//!
//! The dispatcher builds the message and classifies provider failures. A
//! provider only moves bytes to a device address. `LogPushProvider` is the
//! development stub. `FcmPushProvider` talks to Firebase Cloud Messaging.
//!
//! The `expires_at` carried in a login message is advisory. The device uses
//! it to hide stale prompts; nothing on the server rejects late answers.

mod fcm;
mod oauth;

pub use fcm::{FcmConfig, FcmCredentials, FcmPushProvider, DEFAULT_FCM_ENDPOINT};
pub use oauth::{ServiceAccountKey, DEFAULT_TOKEN_URI, FCM_SCOPE};

use super::error::AuthError;
use super::models::Identity;
use super::policy::AuthPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const LOGIN_TITLE: &str = "Login request";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Login confirmation carrying the relying site and its answer window.
    #[must_use]
    pub fn login(
        relying_site_id: &str,
        relying_site_name: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            LOGIN_TITLE,
            format!("Approve sign-in to {relying_site_name}?"),
        )
        .with_data("type", "login")
        .with_data("relyingSiteId", relying_site_id)
        .with_data("relyingSiteName", relying_site_name)
        .with_data("issuedAt", issued_at.to_rfc3339())
        .with_data("expiresAt", expires_at.to_rfc3339())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PushError {
    /// The address is malformed or no longer registered with the provider.
    #[error("invalid push address: {0}")]
    InvalidAddress(String),
    #[error("{0}")]
    Provider(String),
}

/// Delivery channel to a device push address.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, address: &str, message: &PushMessage)
        -> Result<DeliveryReceipt, PushError>;
}

/// Local dev provider that logs the message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogPushProvider;

#[async_trait]
impl PushProvider for LogPushProvider {
    async fn send(
        &self,
        address: &str,
        message: &PushMessage,
    ) -> Result<DeliveryReceipt, PushError> {
        let message_id = Uuid::new_v4().to_string();
        info!(
            address = %address,
            title = %message.title,
            body = %message.body,
            data = ?message.data,
            message_id = %message_id,
            "push send stub"
        );
        Ok(DeliveryReceipt {
            message_id,
            sent_at: Utc::now(),
        })
    }
}

/// A login confirmation that reached the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginPush {
    pub receipt: DeliveryReceipt,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expires_in_seconds: i64,
}

pub struct PushDispatcher {
    provider: Arc<dyn PushProvider>,
    ttl: Duration,
    timeout: std::time::Duration,
}

impl PushDispatcher {
    #[must_use]
    pub fn new(provider: Arc<dyn PushProvider>, policy: &AuthPolicy) -> Self {
        Self {
            provider,
            ttl: Duration::seconds(policy.push_ttl_seconds()),
            timeout: policy.push_timeout(),
        }
    }

    /// Ask the bound device to approve a login on a relying site.
    ///
    /// # Errors
    /// `NoToken` without a push address, `InvalidToken` when the provider
    /// rejects the address, `Provider` for any other failure or a timeout.
    #[instrument(skip(self, identity), fields(mobile_number = %identity.mobile_number))]
    pub async fn notify_login(
        &self,
        identity: &Identity,
        relying_site_id: &str,
        relying_site_name: &str,
        now: DateTime<Utc>,
    ) -> Result<LoginPush, AuthError> {
        let expires_at = now + self.ttl;
        let message = PushMessage::login(relying_site_id, relying_site_name, now, expires_at);
        let receipt = self.deliver(identity, &message).await?;

        Ok(LoginPush {
            receipt,
            issued_at: now,
            expires_at,
            expires_in_seconds: self.ttl.num_seconds(),
        })
    }

    /// Free-form notification to the bound device.
    ///
    /// # Errors
    /// Same classification as [`PushDispatcher::notify_login`].
    #[instrument(skip(self, identity, body), fields(mobile_number = %identity.mobile_number))]
    pub async fn notify(
        &self,
        identity: &Identity,
        title: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, AuthError> {
        let message = PushMessage::new(title, body).with_data("type", "notification");
        self.deliver(identity, &message).await
    }

    async fn deliver(
        &self,
        identity: &Identity,
        message: &PushMessage,
    ) -> Result<DeliveryReceipt, AuthError> {
        let Some(address) = identity
            .push_address
            .as_deref()
            .filter(|address| !address.is_empty())
        else {
            return Err(AuthError::NoToken);
        };

        match tokio::time::timeout(self.timeout, self.provider.send(address, message)).await {
            Ok(Ok(receipt)) => {
                info!(message_id = %receipt.message_id, "push delivered");
                Ok(receipt)
            }
            Ok(Err(PushError::InvalidAddress(detail))) => {
                warn!(device_id = %identity.device_id, "push address rejected: {detail}");
                Err(AuthError::InvalidToken(detail))
            }
            Ok(Err(PushError::Provider(detail))) => {
                warn!("push provider failure: {detail}");
                Err(AuthError::Provider(detail))
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis(), "push delivery timed out");
                Err(AuthError::Provider(format!(
                    "push delivery timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}
