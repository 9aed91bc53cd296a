use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

use posterrang::database::schema;
use posterrang::services::invite_service::{self, NewSubmission, SubmitError};
use posterrang::services::poster_service::{PosterConfig, PosterError};
use posterrang::services::referral_service::{self, CreateAttendee, StoreError};
use posterrang::services::render_service::{RenderError, Renderer};
use posterrang::services::template_service::{IMAGE_MARKER, NAME_MARKER};

/// Stands in for the browser session. Records whether the attendee store
/// was still empty at capture time, which is how the poster-before-record
/// ordering is observed from the outside.
struct FakeRenderer {
    pool: SqlitePool,
    fail: bool,
    store_was_empty_at_render: AtomicBool,
}

impl FakeRenderer {
    fn new(pool: SqlitePool, fail: bool) -> Self {
        Self {
            pool,
            fail,
            store_was_empty_at_render: AtomicBool::new(false),
        }
    }
}

impl Renderer for FakeRenderer {
    async fn render(
        &self,
        _html: &str,
        _doc_dir: &Path,
        output_path: &Path,
    ) -> Result<(), RenderError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendees")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RenderError::CaptureFailure(e.to_string()))?;
        self.store_was_empty_at_render
            .store(count == 0, Ordering::SeqCst);

        if self.fail {
            return Err(RenderError::Timeout(10));
        }
        std::fs::write(output_path, b"png").unwrap();
        Ok(())
    }
}

async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::ensure_schema(&pool).await.unwrap();
    pool
}

fn test_site(dir: &TempDir) -> (PosterConfig, PathBuf) {
    let config = PosterConfig {
        template_path: dir.path().join("poster-template.html"),
        uploads_root: dir.path().to_path_buf(),
    };
    std::fs::write(
        &config.template_path,
        format!("<img class=\"overlay-image\" src=\"{IMAGE_MARKER}\"><span>{NAME_MARKER}</span>"),
    )
    .unwrap();
    let photo_path = dir.path().join("photo.png");
    std::fs::write(&photo_path, b"not really a png").unwrap();
    (config, photo_path)
}

fn submission<'a>(token: &'a str, photo_path: &'a Path) -> NewSubmission<'a> {
    NewSubmission {
        name: "Asha",
        contact: "0612345678",
        public_token: token,
        photo_path,
        referrer_token: None,
    }
}

#[tokio::test]
async fn poster_exists_before_the_attendee_record() {
    let dir = tempfile::tempdir().unwrap();
    let (config, photo_path) = test_site(&dir);
    let pool = test_pool().await;
    let renderer = FakeRenderer::new(pool.clone(), false);

    let attendee = invite_service::submit(&pool, &renderer, &config, submission("T1", &photo_path))
        .await
        .unwrap();

    assert!(renderer.store_was_empty_at_render.load(Ordering::SeqCst));
    assert!(config.poster_path("T1").exists());
    assert_eq!(attendee.public_token, "T1");
    assert_eq!(
        attendee.poster_path,
        config.poster_path("T1").display().to_string()
    );
}

#[tokio::test]
async fn failed_render_leaves_no_attendee() {
    let dir = tempfile::tempdir().unwrap();
    let (config, photo_path) = test_site(&dir);
    let pool = test_pool().await;
    let renderer = FakeRenderer::new(pool.clone(), true);

    let err = invite_service::submit(&pool, &renderer, &config, submission("T1", &photo_path))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::Poster(PosterError::Render(RenderError::Timeout(_)))
    ));
    assert!(!config.poster_path("T1").exists());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendees")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(referral_service::find_by_token(&pool, "T1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn referred_submission_credits_the_referrer() {
    let dir = tempfile::tempdir().unwrap();
    let (config, photo_path) = test_site(&dir);
    let pool = test_pool().await;
    let renderer = FakeRenderer::new(pool.clone(), false);

    let referrer = referral_service::create_attendee(
        &pool,
        CreateAttendee {
            name: "Rani",
            contact: "0600000000",
            photo_path: "/uploads/r.png",
            poster_path: "/uploads/poster-r.png",
            public_token: "R1",
        },
        None,
    )
    .await
    .unwrap();

    let attendee = invite_service::submit(
        &pool,
        &renderer,
        &config,
        NewSubmission {
            referrer_token: Some("R1"),
            ..submission("T1", &photo_path)
        },
    )
    .await
    .unwrap();

    assert_eq!(attendee.referred_by.as_deref(), Some(referrer.id.as_str()));
    let referrer = referral_service::find_by_token(&pool, "R1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(referrer.referral_count, 1);
}

#[tokio::test]
async fn duplicate_token_surfaces_and_strands_the_poster() {
    let dir = tempfile::tempdir().unwrap();
    let (config, photo_path) = test_site(&dir);
    let pool = test_pool().await;
    let renderer = FakeRenderer::new(pool.clone(), false);

    invite_service::submit(&pool, &renderer, &config, submission("T1", &photo_path))
        .await
        .unwrap();

    let err = invite_service::submit(&pool, &renderer, &config, submission("T1", &photo_path))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Store(StoreError::DuplicateToken)));

    // The second render already succeeded; that poster file stays behind
    // on disk while the store keeps only the first record.
    assert!(config.poster_path("T1").exists());
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendees")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
