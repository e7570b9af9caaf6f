//! Identity and trust records shared by the stores and the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

/// Collapsed authentication state of an identity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityState {
    PendingVerification,
    VerifiedInactive,
    VerifiedActive,
}

/// A mobile number bound to one device and push address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(skip)]
    pub id: Uuid,
    pub mobile_number: String,
    pub email: Option<String>,
    pub device_id: String,
    pub device_name: String,
    pub push_address: Option<String>,
    #[serde(skip)]
    pub challenge_code: Option<String>,
    #[serde(skip)]
    pub challenge_expiry: Option<DateTime<Utc>>,
    pub is_verified: bool,
    pub is_active: bool,
    pub is_authenticated: Option<bool>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    #[must_use]
    pub fn new(registration: &Registration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mobile_number: registration.mobile_number.clone(),
            email: registration.email.clone(),
            device_id: registration.device_id.clone(),
            device_name: registration.device_name.clone(),
            push_address: Some(registration.push_address.clone()),
            challenge_code: None,
            challenge_expiry: None,
            is_verified: false,
            is_active: false,
            is_authenticated: None,
            registered_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the device binding; verification starts over.
    pub fn rebind(&mut self, registration: &Registration, now: DateTime<Utc>) {
        self.email.clone_from(&registration.email);
        self.device_id.clone_from(&registration.device_id);
        self.device_name.clone_from(&registration.device_name);
        self.push_address = Some(registration.push_address.clone());
        self.is_verified = false;
        self.is_active = false;
        self.updated_at = now;
    }

    #[must_use]
    pub const fn state(&self) -> IdentityState {
        match (self.is_verified, self.is_active) {
            (false, _) => IdentityState::PendingVerification,
            (true, false) => IdentityState::VerifiedInactive,
            (true, true) => IdentityState::VerifiedActive,
        }
    }

    #[must_use]
    pub const fn is_active_verified(&self) -> bool {
        self.is_verified && self.is_active
    }
}

impl<'r> FromRow<'r, PgRow> for Identity {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            mobile_number: row.try_get("mobile_number")?,
            email: row.try_get("email")?,
            device_id: row.try_get("device_id")?,
            device_name: row.try_get("device_name")?,
            push_address: row.try_get("push_address")?,
            challenge_code: row.try_get("challenge_code")?,
            challenge_expiry: row.try_get("challenge_expiry")?,
            is_verified: row.try_get("is_verified")?,
            is_active: row.try_get("is_active")?,
            is_authenticated: row.try_get("is_authenticated")?,
            registered_at: row.try_get("registered_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Input for `register_or_rebind`, already trimmed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub mobile_number: String,
    pub email: Option<String>,
    pub device_id: String,
    pub device_name: String,
    pub push_address: String,
}

/// Result of a registration: the saved identity plus the code to deliver.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub identity: Identity,
    pub otp: String,
    pub created: bool,
}

/// Accept/deny outcome of a relying-site login, one per bound device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
    pub website_id: String,
    pub mobile_number: String,
    pub device_id: String,
    pub is_authenticate: bool,
    pub timestamp: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TrustRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            website_id: row.try_get("website_id")?,
            mobile_number: row.try_get("mobile_number")?,
            device_id: row.try_get("device_id")?,
            is_authenticate: row.try_get("is_authenticate")?,
            timestamp: row.try_get("decided_at")?,
        })
    }
}
