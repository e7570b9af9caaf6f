use super::types::SiteDecisionRequest;
use super::{failure, missing_payload, respond, Envelope};
use crate::auth::AuthService;
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
    path= "/v1/websites/authenticate",
    request_body = SiteDecisionRequest,
    responses (
        (status = 200, description = "Decision recorded in the trust ledger", body = Envelope),
        (status = 404, description = "No verified, active identity for the number", body = Envelope),
    ),
    tag= "websites"
)]
#[instrument(skip(service, payload))]
pub async fn authenticate(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<SiteDecisionRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match service
        .record_site_decision(&request.mobile_number, &request.website_id, request.accepted)
        .await
    {
        Ok(record) => {
            let message = if record.is_authenticate {
                "Logged in successfully"
            } else {
                "Login denied"
            };
            respond(StatusCode::OK, message, &record)
        }
        Err(err) => failure(&err),
    }
}

#[utoipa::path(
    get,
    path= "/v1/websites/{website_id}/users/{mobile_number}",
    params(
        ("website_id" = String, Path, description = "Relying site id"),
        ("mobile_number" = String, Path, description = "Ten digit mobile number")
    ),
    responses (
        (status = 200, description = "Latest decision for the site", body = Envelope),
        (status = 404, description = "No decision recorded", body = Envelope),
    ),
    tag= "websites"
)]
#[instrument(skip(service))]
pub async fn trust_status(
    service: Extension<Arc<AuthService>>,
    Path((website_id, mobile_number)): Path<(String, String)>,
) -> Response {
    match service.get_trust_status(&mobile_number, &website_id).await {
        Ok(record) => respond(StatusCode::OK, "Trust status fetched", &record),
        Err(err) => failure(&err),
    }
}
