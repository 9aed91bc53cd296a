use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::warn;

use crate::services::referral_service;
use crate::web::AppState;

/// Referral statistics for the admin dashboard, computed fresh per call.
pub async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    match referral_service::stats_snapshot(&state.pool).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            warn!("Stats snapshot failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Error fetching statistics" })),
            )
                .into_response()
        }
    }
}
