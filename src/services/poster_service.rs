use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::services::render_service::{RenderError, Renderer};
use crate::services::template_service;

#[derive(Error, Debug)]
pub enum PosterError {
    #[error("poster template not found at {0}")]
    TemplateMissing(PathBuf),

    #[error("attendee name is empty")]
    EmptyName,

    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Debug, Clone)]
pub struct PosterConfig {
    /// Shared HTML template every poster is composed from.
    pub template_path: PathBuf,
    /// Directory holding uploaded photos, staged documents and finished
    /// posters; also served as /uploads.
    pub uploads_root: PathBuf,
}

impl PosterConfig {
    pub fn from_env() -> Self {
        Self {
            template_path: std::env::var("TEMPLATE_PATH")
                .unwrap_or_else(|_| "public/uploads/poster-template.html".to_string())
                .into(),
            uploads_root: std::env::var("UPLOADS_DIR")
                .unwrap_or_else(|_| "public/uploads".to_string())
                .into(),
        }
    }

    pub fn poster_path(&self, public_token: &str) -> PathBuf {
        self.uploads_root.join(format!("poster-{}.png", public_token))
    }
}

/// Compose the template with the attendee's name and photo and rasterize
/// it to `output_path`. The template is read before anything touches the
/// filesystem, so a missing template has no side effects.
pub async fn generate<R: Renderer>(
    renderer: &R,
    config: &PosterConfig,
    name: &str,
    photo_path: &Path,
    output_path: &Path,
) -> Result<PathBuf, PosterError> {
    if name.trim().is_empty() {
        return Err(PosterError::EmptyName);
    }

    let template = match tokio::fs::read_to_string(&config.template_path).await {
        Ok(template) => template,
        Err(_) => return Err(PosterError::TemplateMissing(config.template_path.clone())),
    };

    let html = template_service::compose(name, photo_path, &template, &config.uploads_root);
    renderer
        .render(&html, &config.uploads_root, output_path)
        .await?;

    debug!("Poster rendered to {:?}", output_path);
    Ok(output_path.to_path_buf())
}
