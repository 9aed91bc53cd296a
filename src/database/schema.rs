use sqlx::SqlitePool;

const SQL_CREATE_ATTENDEES: &str = r#"
CREATE TABLE IF NOT EXISTS attendees (
  id              TEXT PRIMARY KEY,
  name            TEXT NOT NULL,
  contact         TEXT NOT NULL,
  photo_path      TEXT NOT NULL,
  poster_path     TEXT NOT NULL,
  public_token    TEXT NOT NULL UNIQUE,
  referred_by     TEXT REFERENCES attendees(id),
  referral_count  INTEGER NOT NULL DEFAULT 0,
  created_at      TEXT NOT NULL DEFAULT (datetime('now'))
)
"#;

const SQL_CREATE_REFERRAL_COUNT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_attendees_referral_count
ON attendees (referral_count DESC)
"#;

/// Idempotent schema setup, run at startup (and by tests against an
/// in-memory database).
pub async fn ensure_schema(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query(SQL_CREATE_ATTENDEES).execute(pool).await?;
    sqlx::query(SQL_CREATE_REFERRAL_COUNT_INDEX)
        .execute(pool)
        .await?;
    Ok(())
}
