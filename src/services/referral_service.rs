use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::database::attendee_repo::{self, NewAttendee};
use crate::models::AttendeeRow;

const TOP_REFERRER_LIMIT: i64 = 10;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The public token is already taken. Hard error; the caller must
    /// re-submit with a fresh token.
    #[error("public token already in use")]
    DuplicateToken,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct CreateAttendee<'a> {
    pub name: &'a str,
    pub contact: &'a str,
    pub photo_path: &'a str,
    pub poster_path: &'a str,
    pub public_token: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ReferrerView {
    pub name: String,
    pub public_token: String,
    pub referral_count: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub total_count: i64,
    pub direct_count: i64,
    pub referred_count: i64,
    pub top_referrers: Vec<ReferrerView>,
}

pub async fn find_by_token(pool: &SqlitePool, token: &str) -> sqlx::Result<Option<AttendeeRow>> {
    attendee_repo::find_by_token(pool, token).await
}

/// Persist a new attendee and credit the referrer, if any.
///
/// The referrer is resolved first, by token: an absent or unknown token
/// degrades to "no referrer" instead of failing the submission. Because
/// the referrer must already exist before the new row is written,
/// self-references and cycles cannot occur.
///
/// The referral counter is bumped only after the new row is durable, as
/// a separate write. A crash between the two writes leaves the referrer
/// undercounted; creation is never blocked on a cross-record transaction.
pub async fn create_attendee(
    pool: &SqlitePool,
    fields: CreateAttendee<'_>,
    referrer_token: Option<&str>,
) -> Result<AttendeeRow, StoreError> {
    let referrer = resolve_referrer(pool, referrer_token).await;
    let id = Uuid::new_v4().to_string();

    let inserted = attendee_repo::insert_attendee(
        pool,
        NewAttendee {
            id: &id,
            name: fields.name.trim(),
            contact: fields.contact.trim(),
            photo_path: fields.photo_path,
            poster_path: fields.poster_path,
            public_token: fields.public_token,
            referred_by: referrer.as_ref().map(|r| r.id.as_str()),
        },
    )
    .await;

    match inserted {
        Ok(()) => {}
        Err(e) if is_unique_violation(&e) => return Err(StoreError::DuplicateToken),
        Err(e) => return Err(e.into()),
    }

    if let Some(referrer) = referrer {
        match attendee_repo::increment_referral_count(pool, &referrer.id).await {
            Ok(1) => {}
            Ok(n) => warn!(
                "Referral increment touched {} rows for attendee {}",
                n, referrer.id
            ),
            // The new attendee is already durable; an undercounted
            // referrer beats a failed submission here.
            Err(e) => warn!("Referral increment failed for {}: {}", referrer.id, e),
        }
    }

    let attendee = attendee_repo::find_by_token(pool, fields.public_token)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok(attendee)
}

async fn resolve_referrer(pool: &SqlitePool, token: Option<&str>) -> Option<AttendeeRow> {
    let token = token?.trim();
    if token.is_empty() {
        return None;
    }
    match attendee_repo::find_by_token(pool, token).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Referrer lookup failed for token {}: {}", token, e);
            None
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Fresh counts on every call; the admin view is low-traffic and stale
/// numbers confuse more than they save.
pub async fn stats_snapshot(pool: &SqlitePool) -> sqlx::Result<StatsSnapshot> {
    let total_count = attendee_repo::count_all(pool).await?;
    let direct_count = attendee_repo::count_direct(pool).await?;
    let top_referrers = attendee_repo::top_referrers(pool, TOP_REFERRER_LIMIT)
        .await?
        .into_iter()
        .map(|row| ReferrerView {
            name: row.name,
            public_token: row.public_token,
            referral_count: row.referral_count,
        })
        .collect();

    Ok(StatsSnapshot {
        total_count,
        direct_count,
        referred_count: total_count - direct_count,
        top_referrers,
    })
}
