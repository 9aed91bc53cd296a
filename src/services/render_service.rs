use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// The poster layout tags its photo with this class; capture waits until
/// the element is visible and its image data has actually loaded.
const OVERLAY_SELECTOR: &str = ".overlay-image";

const VISIBILITY_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("poster overlay not visible within {0} ms")]
    Timeout(u64),

    #[error("render process unavailable: {0}")]
    ProcessUnavailable(String),

    #[error("poster capture failed: {0}")]
    CaptureFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Fresh headless Chrome per request, torn down after capture.
    Ephemeral,
    /// One long-lived Chrome reached over its DevTools websocket; each
    /// request opens and closes its own page.
    Pooled,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub mode: RenderMode,
    /// DevTools websocket URL, pooled mode only.
    pub connection_endpoint: Option<String>,
    pub visibility_timeout_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::Ephemeral,
            connection_endpoint: None,
            visibility_timeout_ms: 10_000,
            settle_delay_ms: 500,
        }
    }
}

impl RenderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mode: std::env::var("RENDER_MODE")
                .map(|v| parse_mode(&v))
                .unwrap_or(defaults.mode),
            connection_endpoint: std::env::var("RENDER_WS_URL").ok(),
            visibility_timeout_ms: env_u64("RENDER_VISIBILITY_TIMEOUT_MS")
                .unwrap_or(defaults.visibility_timeout_ms),
            settle_delay_ms: env_u64("RENDER_SETTLE_DELAY_MS").unwrap_or(defaults.settle_delay_ms),
        }
    }
}

fn parse_mode(raw: &str) -> RenderMode {
    match raw.trim().to_lowercase().as_str() {
        "pooled" => RenderMode::Pooled,
        _ => RenderMode::Ephemeral,
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Seam between the poster pipeline and the actual browser, so the
/// pipeline can be exercised without a live Chrome.
#[allow(async_fn_in_trait)]
pub trait Renderer {
    /// Rasterize `html` to a transparent full-page PNG at `output_path`.
    /// The document is staged as a temp file inside `doc_dir` so relative
    /// image references resolve against the uploads directory.
    async fn render(
        &self,
        html: &str,
        doc_dir: &Path,
        output_path: &Path,
    ) -> Result<(), RenderError>;
}

/// Holds at most one live connection. Establishment runs under the slot
/// lock, so concurrent first callers share one attempt instead of each
/// opening their own; a handed-out connection that turns out dead can be
/// invalidated so the next caller reconnects.
struct ConnectionSlot<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> ConnectionSlot<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    async fn get_or_connect<F, Fut, E>(&self, connect: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(Arc::clone(connection));
        }
        let connection = Arc::new(connect().await?);
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Drops `failed` from the slot. A connection established after
    /// `failed` was handed out is left alone.
    async fn invalidate(&self, failed: &Arc<T>) {
        let mut slot = self.slot.lock().await;
        if slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, failed))
        {
            *slot = None;
        }
    }
}

/// Owns the connection to the render engine. One instance lives in app
/// state for the lifetime of the process; in pooled mode it holds the
/// single shared browser connection.
pub struct RenderSession {
    config: RenderConfig,
    pooled: ConnectionSlot<Browser>,
}

impl RenderSession {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            pooled: ConnectionSlot::new(),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Returns the shared pooled browser, connecting on first use.
    async fn pooled_browser(&self) -> Result<Arc<Browser>, RenderError> {
        let endpoint = self.config.connection_endpoint.clone().ok_or_else(|| {
            RenderError::ProcessUnavailable("pooled mode without RENDER_WS_URL".to_string())
        })?;

        self.pooled
            .get_or_connect(|| async move {
                debug!("Connecting to render engine at {}", endpoint);
                let (browser, mut handler) = Browser::connect(&endpoint)
                    .await
                    .map_err(|e| RenderError::ProcessUnavailable(e.to_string()))?;
                tokio::spawn(async move {
                    while let Some(event) = handler.next().await {
                        if event.is_err() {
                            break;
                        }
                    }
                });
                Ok(browser)
            })
            .await
    }

    async fn render_pooled(&self, doc_url: &str, output_path: &Path) -> Result<(), RenderError> {
        let browser = self.pooled_browser().await?;
        let page = match browser.new_page(doc_url).await {
            Ok(page) => page,
            Err(e) => {
                // A failed page open means the shared connection is gone;
                // drop it so the next caller re-establishes.
                self.pooled.invalidate(&browser).await;
                return Err(RenderError::ProcessUnavailable(e.to_string()));
            }
        };
        let captured = self.capture(&page, output_path).await;
        // Only the page belongs to this request; the browser stays warm.
        if let Err(e) = page.close().await {
            warn!("Failed to close render page: {}", e);
        }
        captured
    }

    async fn render_ephemeral(&self, doc_url: &str, output_path: &Path) -> Result<(), RenderError> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(RenderError::ProcessUnavailable)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::ProcessUnavailable(e.to_string()))?;
        let driver = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let captured = match browser.new_page(doc_url).await {
            Ok(page) => self.capture(&page, output_path).await,
            Err(e) => Err(RenderError::ProcessUnavailable(e.to_string())),
        };

        if let Err(e) = browser.close().await {
            warn!("Failed to close ephemeral render process: {}", e);
        }
        let _ = browser.wait().await;
        driver.abort();
        captured
    }

    async fn capture(&self, page: &Page, output_path: &Path) -> Result<(), RenderError> {
        self.wait_for_overlay(page).await?;
        // Fixed settle delay to absorb layout/paint races after the image
        // reports loaded.
        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;

        page.save_screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(true)
                .omit_background(true)
                .build(),
            output_path,
        )
        .await
        .map_err(|e| RenderError::CaptureFailure(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_overlay(&self, page: &Page) -> Result<(), RenderError> {
        let expression = overlay_ready_expression();
        wait_until(self.config.visibility_timeout_ms, || {
            overlay_is_ready(page, &expression)
        })
        .await
    }
}

/// Readiness predicate evaluated in the page: the overlay must be in
/// layout (visible) and, for an image, have its pixel data decoded. An
/// attached-but-still-loading node does not count.
fn overlay_ready_expression() -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector('{OVERLAY_SELECTOR}');
  if (!el || el.offsetParent === null) return false;
  if (el.tagName === 'IMG') return el.complete && el.naturalWidth > 0;
  return true;
}})()"#
    )
}

async fn overlay_is_ready(page: &Page, expression: &str) -> bool {
    match page.evaluate(expression).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        // Evaluation racing navigation counts as not ready yet.
        Err(_) => false,
    }
}

/// Polls `ready` until it reports true or `timeout_ms` elapses.
async fn wait_until<F, Fut>(timeout_ms: u64, mut ready: F) -> Result<(), RenderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if ready().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RenderError::Timeout(timeout_ms));
        }
        tokio::time::sleep(VISIBILITY_POLL_INTERVAL).await;
    }
}

impl Renderer for RenderSession {
    async fn render(
        &self,
        html: &str,
        doc_dir: &Path,
        output_path: &Path,
    ) -> Result<(), RenderError> {
        let doc = TempDoc::write(doc_dir, html)
            .map_err(|e| RenderError::CaptureFailure(format!("could not stage document: {}", e)))?;
        let doc_url = doc.file_url();

        // `doc` is dropped on every exit path, so the staged file never
        // outlives the capture attempt.
        match self.config.mode {
            RenderMode::Ephemeral => self.render_ephemeral(&doc_url, output_path).await,
            RenderMode::Pooled => self.render_pooled(&doc_url, output_path).await,
        }
    }
}

/// Composed document staged on disk for `file://` loading; removed when
/// dropped, on success and failure alike.
struct TempDoc {
    path: PathBuf,
}

impl TempDoc {
    fn write(dir: &Path, html: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("poster-{}.html", Uuid::new_v4()));
        std::fs::write(&path, html)?;
        Ok(Self { path })
    }

    fn file_url(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

impl Drop for TempDoc {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove temp poster document {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn temp_doc_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let doc = TempDoc::write(dir.path(), "<html></html>").unwrap();
        let path = doc.path.clone();
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html></html>");
        drop(doc);
        assert!(!path.exists());
    }

    #[test]
    fn temp_docs_get_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = TempDoc::write(dir.path(), "a").unwrap();
        let b = TempDoc::write(dir.path(), "b").unwrap();
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn mode_parsing_defaults_to_ephemeral() {
        assert_eq!(parse_mode("pooled"), RenderMode::Pooled);
        assert_eq!(parse_mode("Pooled "), RenderMode::Pooled);
        assert_eq!(parse_mode("ephemeral"), RenderMode::Ephemeral);
        assert_eq!(parse_mode("anything-else"), RenderMode::Ephemeral);
    }

    #[test]
    fn default_settle_delay_is_500ms() {
        assert_eq!(RenderConfig::default().settle_delay_ms, 500);
    }

    #[test]
    fn readiness_checks_load_completion_not_just_attachment() {
        let expression = overlay_ready_expression();
        assert!(expression.contains(OVERLAY_SELECTOR));
        assert!(expression.contains("el.complete && el.naturalWidth > 0"));
        assert!(expression.contains("offsetParent"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_returns_once_ready() {
        let polls = AtomicUsize::new(0);
        let result = wait_until(10_000, || {
            let ready = polls.fetch_add(1, Ordering::SeqCst) >= 3;
            async move { ready }
        })
        .await;
        assert!(result.is_ok());
        assert!(polls.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_maps_expiry_to_timeout() {
        let result = wait_until(750, || async { false }).await;
        assert!(matches!(result, Err(RenderError::Timeout(750))));
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_connection() {
        let slot = Arc::new(ConnectionSlot::<u32>::new());
        let connects = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let slot = Arc::clone(&slot);
            let connects = Arc::clone(&connects);
            tasks.push(tokio::spawn(async move {
                slot.get_or_connect(|| async {
                    connects.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, RenderError>(7)
                })
                .await
                .unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(*task.await.unwrap(), 7);
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_the_slot_empty() {
        let slot = ConnectionSlot::<u32>::new();
        let err = slot
            .get_or_connect(|| async { Err(RenderError::ProcessUnavailable("down".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::ProcessUnavailable(_)));

        let connected = slot
            .get_or_connect(|| async { Ok::<_, RenderError>(7) })
            .await
            .unwrap();
        assert_eq!(*connected, 7);
    }

    #[tokio::test]
    async fn invalidated_connection_is_reestablished() {
        let slot = ConnectionSlot::<u32>::new();
        let connects = AtomicUsize::new(0);
        let connect = || async {
            Ok::<_, RenderError>(connects.fetch_add(1, Ordering::SeqCst) as u32)
        };

        let first = slot.get_or_connect(connect).await.unwrap();
        let again = slot.get_or_connect(connect).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        // The dead connection is dropped; the next caller reconnects.
        slot.invalidate(&first).await;
        let second = slot.get_or_connect(connect).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_invalidation_keeps_the_newer_connection() {
        let slot = ConnectionSlot::<u32>::new();
        let first = slot
            .get_or_connect(|| async { Ok::<_, RenderError>(1) })
            .await
            .unwrap();
        slot.invalidate(&first).await;
        let second = slot
            .get_or_connect(|| async { Ok::<_, RenderError>(2) })
            .await
            .unwrap();

        // A late invalidation of the already-replaced handle is a no-op.
        slot.invalidate(&first).await;
        let third = slot
            .get_or_connect(|| async { Ok::<_, RenderError>(3) })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(*third, 2);
    }
}
