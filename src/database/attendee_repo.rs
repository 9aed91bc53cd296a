use sqlx::SqlitePool;

use crate::models::AttendeeRow;

pub struct NewAttendee<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub contact: &'a str,
    pub photo_path: &'a str,
    pub poster_path: &'a str,
    pub public_token: &'a str,
    pub referred_by: Option<&'a str>,
}

pub const SQL_FIND_BY_TOKEN: &str = r#"
SELECT
  id,
  name,
  contact,
  photo_path,
  poster_path,
  public_token,
  referred_by,
  referral_count,
  created_at
FROM attendees
WHERE public_token = ?1
LIMIT 1
"#;

const SQL_INSERT_ATTENDEE: &str = r#"
INSERT INTO attendees (
  id,
  name,
  contact,
  photo_path,
  poster_path,
  public_token,
  referred_by
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

const SQL_INCREMENT_REFERRAL_COUNT: &str = r#"
UPDATE attendees
SET referral_count = referral_count + 1
WHERE id = ?1
"#;

const SQL_COUNT_ALL: &str = "SELECT COUNT(*) FROM attendees";

const SQL_COUNT_DIRECT: &str = "SELECT COUNT(*) FROM attendees WHERE referred_by IS NULL";

const SQL_TOP_REFERRERS: &str = r#"
SELECT
  id,
  name,
  contact,
  photo_path,
  poster_path,
  public_token,
  referred_by,
  referral_count,
  created_at
FROM attendees
WHERE referral_count > 0
ORDER BY referral_count DESC
LIMIT ?1
"#;

pub async fn find_by_token(pool: &SqlitePool, token: &str) -> sqlx::Result<Option<AttendeeRow>> {
    sqlx::query_as::<_, AttendeeRow>(SQL_FIND_BY_TOKEN)
        .bind(token)
        .fetch_optional(pool)
        .await
}

pub async fn insert_attendee(pool: &SqlitePool, attendee: NewAttendee<'_>) -> sqlx::Result<()> {
    sqlx::query(SQL_INSERT_ATTENDEE)
        .bind(attendee.id)
        .bind(attendee.name)
        .bind(attendee.contact)
        .bind(attendee.photo_path)
        .bind(attendee.poster_path)
        .bind(attendee.public_token)
        .bind(attendee.referred_by)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn increment_referral_count(pool: &SqlitePool, attendee_id: &str) -> sqlx::Result<u64> {
    let result = sqlx::query(SQL_INCREMENT_REFERRAL_COUNT)
        .bind(attendee_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count_all(pool: &SqlitePool) -> sqlx::Result<i64> {
    sqlx::query_scalar(SQL_COUNT_ALL).fetch_one(pool).await
}

pub async fn count_direct(pool: &SqlitePool) -> sqlx::Result<i64> {
    sqlx::query_scalar(SQL_COUNT_DIRECT).fetch_one(pool).await
}

pub async fn top_referrers(pool: &SqlitePool, limit: i64) -> sqlx::Result<Vec<AttendeeRow>> {
    sqlx::query_as::<_, AttendeeRow>(SQL_TOP_REFERRERS)
        .bind(limit)
        .fetch_all(pool)
        .await
}
