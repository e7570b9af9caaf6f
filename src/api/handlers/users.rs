use super::types::{
    CountResponse, IdentityResponse, LoginPushRequest, LoginPushResponse, MobileNumberRequest,
    NotificationRequest, RegisterRequest, RegisterResponse, UpdatePushAddressRequest,
    VerifyOtpRequest,
};
use super::{failure, missing_payload, respond, Envelope};
use crate::auth::{AuthService, Registration};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    Json,
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path= "/v1/users/register",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "Identity created and challenge issued", body = Envelope),
        (status = 200, description = "Identity rebound to the device and challenge reissued", body = Envelope),
        (status = 400, description = "Invalid mobile number, email or device fields", body = Envelope),
        (status = 409, description = "Device already bound to another mobile number", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service, payload))]
pub async fn register(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RegisterRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let registration = match Registration::parse(
        &request.mobile_number,
        request.email.as_deref(),
        &request.device_id,
        &request.device_name,
        &request.push_address,
    ) {
        Ok(registration) => registration,
        Err(err) => return failure(&err),
    };

    match service.register_or_rebind(registration).await {
        Ok(outcome) => {
            let (status, message) = if outcome.created {
                (StatusCode::CREATED, "User registered, OTP issued")
            } else {
                (StatusCode::OK, "Device updated, OTP reissued")
            };
            respond(
                status,
                message,
                &RegisterResponse {
                    state: outcome.identity.state(),
                    identity: outcome.identity,
                    otp: outcome.otp,
                    created: outcome.created,
                },
            )
        }
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/users/verify-otp",
    request_body = VerifyOtpRequest,
    responses (
        (status = 200, description = "Device verified and activated", body = Envelope),
        (status = 400, description = "Invalid or expired code, see data.error", body = Envelope),
        (status = 404, description = "Unknown mobile number", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service, payload))]
pub async fn verify_otp(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<VerifyOtpRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match service
        .verify_otp(
            &request.mobile_number,
            &request.otp,
            request.push_address.as_deref(),
        )
        .await
    {
        Ok(identity) => respond(
            StatusCode::OK,
            "OTP verified successfully",
            &IdentityResponse::from(identity),
        ),
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/users/on-login",
    request_body = LoginPushRequest,
    responses (
        (status = 200, description = "Login confirmation pushed to the active device", body = Envelope),
        (status = 400, description = "No push address or address rejected by the provider", body = Envelope),
        (status = 404, description = "No verified, active identity for the number", body = Envelope),
        (status = 500, description = "Push provider failure", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service, payload))]
pub async fn on_login(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<LoginPushRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match service
        .request_login_push(
            &request.mobile_number,
            &request.website_id,
            &request.website_name,
        )
        .await
    {
        Ok(push) => respond(
            StatusCode::OK,
            "Login notification sent",
            &LoginPushResponse {
                receipt: push.receipt,
                expires_at: push.expires_at,
                expires_in_seconds: push.expires_in_seconds,
            },
        ),
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/users/update-device-token",
    request_body = UpdatePushAddressRequest,
    responses (
        (status = 200, description = "Push address replaced", body = Envelope),
        (status = 400, description = "Old push address does not match", body = Envelope),
        (status = 404, description = "Unknown device", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service, payload))]
pub async fn update_device_token(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<UpdatePushAddressRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match service
        .update_push_address(
            &request.device_id,
            &request.old_push_address,
            &request.new_push_address,
        )
        .await
    {
        Ok(identity) => respond(
            StatusCode::OK,
            "Push address updated successfully",
            &IdentityResponse::from(identity),
        ),
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/users/send-notification",
    request_body = NotificationRequest,
    responses (
        (status = 200, description = "Notification delivered to the provider", body = Envelope),
        (status = 400, description = "No push address or address rejected", body = Envelope),
        (status = 404, description = "Unknown mobile number", body = Envelope),
        (status = 500, description = "Push provider failure", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service, payload))]
pub async fn send_notification(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<NotificationRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match service
        .send_notification(&request.mobile_number, &request.title, &request.body)
        .await
    {
        Ok(receipt) => respond(StatusCode::OK, "Notification sent", &receipt),
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/users/deactivate",
    request_body = MobileNumberRequest,
    responses (
        (status = 200, description = "Every device for the number set inactive", body = Envelope),
        (status = 404, description = "Unknown mobile number", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service, payload))]
pub async fn deactivate(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<MobileNumberRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match service.deactivate(&request.mobile_number).await {
        Ok(count) => respond(StatusCode::OK, "User deactivated", &CountResponse { count }),
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    get,
    path= "/v1/users",
    responses (
        (status = 200, description = "All identities", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service))]
pub async fn list_users(service: Extension<Arc<AuthService>>) -> Response {
    match service.list_identities().await {
        Ok(identities) => respond(StatusCode::OK, "Users fetched successfully", &identities),
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    delete,
    path= "/v1/users",
    responses (
        (status = 200, description = "Every identity deleted", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service))]
pub async fn delete_users(service: Extension<Arc<AuthService>>) -> Response {
    match service.purge_all_identities().await {
        Ok(count) => respond(StatusCode::OK, "All users deleted", &CountResponse { count }),
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    get,
    path= "/v1/users/{mobile_number}",
    params(
        ("mobile_number" = String, Path, description = "Ten digit mobile number")
    ),
    responses (
        (status = 200, description = "Identity for the mobile number", body = Envelope),
        (status = 404, description = "Unknown mobile number", body = Envelope),
    ),
    tag= "users"
)]
#[instrument(skip(service))]
pub async fn get_user(
    service: Extension<Arc<AuthService>>,
    Path(mobile_number): Path<String>,
) -> Response {
    match service.find_identity(&mobile_number).await {
        Ok(identity) => respond(
            StatusCode::OK,
            "User fetched successfully",
            &IdentityResponse::from(identity),
        ),
        Err(err) => failure(&err),
    }
}
