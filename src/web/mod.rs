pub mod routes;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::poster_service::PosterConfig;
use crate::services::render_service::RenderSession;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub render: Arc<RenderSession>,
    pub poster: Arc<PosterConfig>,
}
