use std::path::Path;

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use crate::models::AttendeeRow;
use crate::services::poster_service::{self, PosterConfig, PosterError};
use crate::services::referral_service::{self, CreateAttendee, StoreError};
use crate::services::render_service::Renderer;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Poster(#[from] PosterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct NewSubmission<'a> {
    pub name: &'a str,
    pub contact: &'a str,
    pub public_token: &'a str,
    pub photo_path: &'a Path,
    pub referrer_token: Option<&'a str>,
}

/// One complete submission: render the poster, then persist the attendee,
/// then credit the referrer (inside the store call).
///
/// The poster must be durable before the attendee row is written; a failed
/// render leaves no attendee behind. The reverse gap is accepted: a store
/// failure after a successful render strands a poster file on disk.
pub async fn submit<R: Renderer>(
    pool: &SqlitePool,
    renderer: &R,
    config: &PosterConfig,
    submission: NewSubmission<'_>,
) -> Result<AttendeeRow, SubmitError> {
    let poster_path = config.poster_path(submission.public_token);
    poster_service::generate(
        renderer,
        config,
        submission.name,
        submission.photo_path,
        &poster_path,
    )
    .await?;

    let attendee = referral_service::create_attendee(
        pool,
        CreateAttendee {
            name: submission.name,
            contact: submission.contact,
            photo_path: &submission.photo_path.display().to_string(),
            poster_path: &poster_path.display().to_string(),
            public_token: submission.public_token,
        },
        submission.referrer_token,
    )
    .await?;

    info!(
        "Created attendee {} (token {}, referred: {})",
        attendee.id,
        attendee.public_token,
        attendee.referred_by.is_some()
    );
    Ok(attendee)
}
