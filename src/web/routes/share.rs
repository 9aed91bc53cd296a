use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use tracing::warn;

use crate::services::referral_service;
use crate::services::share_service::{self, EventDetails};
use crate::web::AppState;

/// Builds the WhatsApp share message for an attendee and redirects to the
/// WhatsApp client (app deep link on mobile, web client otherwise).
pub async fn whatsapp_share_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response {
    let attendee = match referral_service::find_by_token(&state.pool, &token).await {
        Ok(Some(attendee)) => attendee,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Invitation not found"),
        Err(e) => {
            warn!("Share lookup failed for {}: {}", token, e);
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
        }
    };

    let base = share_service::base_url();
    let poster_url = format!("/uploads/poster-{}.png", attendee.public_token);
    let invitation_url = format!("{}{}", base, poster_url);
    let invite_url = format!("{}/invite/{}", base, attendee.public_token);

    // Shortened links are cosmetic; either call failing just leaves the
    // long URL in the message.
    let (short_invitation, short_invite) = tokio::join!(
        share_service::shorten_url(&invitation_url),
        share_service::shorten_url(&invite_url),
    );

    let message =
        share_service::build_share_message(&EventDetails::from_env(), &short_invitation, &short_invite);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    Redirect::temporary(&share_service::whatsapp_share_url(&message, user_agent)).into_response()
}

/// Live referral count, polled by the poster page.
pub async fn referral_count_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    match referral_service::find_by_token(&state.pool, &token).await {
        Ok(Some(attendee)) => {
            Json(serde_json::json!({ "count": attendee.referral_count })).into_response()
        }
        Ok(None) => error_json(StatusCode::NOT_FOUND, "Attendee not found"),
        Err(e) => {
            warn!("Referral count lookup failed for {}: {}", token, e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
        }
    }
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
