use crate::auth::push::DeliveryReceipt;
use crate::auth::{Identity, IdentityState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub mobile_number: String,
    pub email: Option<String>,
    pub device_id: String,
    pub device_name: String,
    #[serde(alias = "firebaseToken")]
    pub push_address: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub identity: Identity,
    pub state: IdentityState,
    /// The open challenge code. There is no SMS channel, so it is returned here.
    pub otp: String,
    pub created: bool,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub mobile_number: String,
    pub otp: String,
    /// Replaces the bound push address when the device rotated it.
    #[serde(default, alias = "firebaseToken")]
    pub push_address: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub identity: Identity,
    pub state: IdentityState,
}

impl From<Identity> for IdentityResponse {
    fn from(identity: Identity) -> Self {
        Self {
            state: identity.state(),
            identity,
        }
    }
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginPushRequest {
    pub mobile_number: String,
    pub website_id: String,
    pub website_name: String,
}

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginPushResponse {
    pub receipt: DeliveryReceipt,
    pub expires_at: DateTime<Utc>,
    pub expires_in_seconds: i64,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePushAddressRequest {
    pub device_id: String,
    #[serde(alias = "oldFirebaseToken")]
    pub old_push_address: String,
    #[serde(alias = "newFirebaseToken")]
    pub new_push_address: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub mobile_number: String,
    pub title: String,
    pub body: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MobileNumberRequest {
    pub mobile_number: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SiteDecisionRequest {
    pub mobile_number: String,
    pub website_id: String,
    #[serde(alias = "action")]
    pub accepted: bool,
}
