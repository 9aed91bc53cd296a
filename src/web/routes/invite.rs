use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;
use uuid::Uuid;

use crate::services::invite_service::{self, NewSubmission, SubmitError};
use crate::services::poster_service::PosterError;
use crate::services::referral_service::{self, StoreError};
use crate::services::share_service;
use crate::web::AppState;

/// Mirror of the upload middleware limit, enforced again here since the
/// multipart field arrives fully buffered.
const MAX_PHOTO_BYTES: usize = 5_000_000;

const ALLOWED_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "gif"];
const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/gif"];

struct PhotoUpload {
    file_name: String,
    content_type: Option<String>,
    bytes: axum::body::Bytes,
}

pub async fn generate_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let mut name = String::new();
    let mut mobile = String::new();
    let mut referrer: Option<String> = None;
    let mut photo: Option<PhotoUpload> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed submission body: {}", e);
                return error_json(StatusCode::BAD_REQUEST, "Invalid form submission");
            }
        };

        match field.name().unwrap_or("") {
            "name" => name = field.text().await.unwrap_or_default(),
            "mobile" => mobile = field.text().await.unwrap_or_default(),
            "referrer" => {
                let value = field.text().await.unwrap_or_default();
                if !value.trim().is_empty() {
                    referrer = Some(value.trim().to_string());
                }
            }
            "photo" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let content_type = field.content_type().map(|ct| ct.to_string());
                let bytes = match field.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Photo upload aborted: {}", e);
                        return error_json(StatusCode::BAD_REQUEST, "Photo upload failed");
                    }
                };
                photo = Some(PhotoUpload {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            _ => {}
        }
    }

    if name.trim().is_empty() || mobile.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Name and mobile are required");
    }
    let Some(photo) = photo else {
        return error_json(StatusCode::BAD_REQUEST, "Please upload an image");
    };
    if photo.bytes.len() > MAX_PHOTO_BYTES {
        return error_json(StatusCode::BAD_REQUEST, "Image too large (max 5MB)");
    }
    let Some(extension) = photo_extension(&photo.file_name, photo.content_type.as_deref()) else {
        return error_json(StatusCode::BAD_REQUEST, "Images only (jpeg, jpg, png, gif)");
    };

    let token = Uuid::new_v4().to_string();
    let photo_path = state
        .poster
        .uploads_root
        .join(format!("{}.{}", token, extension));
    if let Err(e) = tokio::fs::write(&photo_path, &photo.bytes).await {
        warn!("Failed to store uploaded photo {:?}: {}", photo_path, e);
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Error storing photo");
    }

    let submitted = invite_service::submit(
        &state.pool,
        state.render.as_ref(),
        &state.poster,
        NewSubmission {
            name: name.trim(),
            contact: mobile.trim(),
            public_token: &token,
            photo_path: &photo_path,
            referrer_token: referrer.as_deref(),
        },
    )
    .await;

    let attendee = match submitted {
        Ok(attendee) => attendee,
        Err(SubmitError::Store(StoreError::DuplicateToken)) => {
            return error_json(StatusCode::CONFLICT, "Please submit again");
        }
        Err(SubmitError::Poster(PosterError::EmptyName)) => {
            return error_json(StatusCode::BAD_REQUEST, "Name and mobile are required");
        }
        Err(e) => {
            warn!("Poster submission failed: {}", e);
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Error generating poster");
        }
    };

    let base = share_service::base_url();
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "token": attendee.public_token,
            "name": attendee.name,
            "poster_url": format!("/uploads/poster-{}.png", attendee.public_token),
            "invite_url": format!("{}/invite/{}", base, attendee.public_token),
            "share_url": format!("{}/share/whatsapp/{}", base, attendee.public_token),
        })),
    )
        .into_response()
}

/// Referrer info for the form page. An unknown token is not an error;
/// the form simply shows no referrer.
pub async fn invite_info_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    match referral_service::find_by_token(&state.pool, &token).await {
        Ok(found) => Json(serde_json::json!({
            "referrer": found.map(|attendee| attendee.name),
        }))
        .into_response(),
        Err(e) => {
            warn!("Referrer lookup failed for {}: {}", token, e);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
        }
    }
}

fn photo_extension(file_name: &str, content_type: Option<&str>) -> Option<String> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_lowercase();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }
    if let Some(content_type) = content_type {
        if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
            return None;
        }
    }
    Some(extension)
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
