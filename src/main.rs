use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;
use tower_http::services::ServeDir;

use posterrang::database::schema;
use posterrang::services::poster_service::PosterConfig;
use posterrang::services::render_service::{RenderConfig, RenderSession};
use posterrang::web::routes::{admin, invite, share};
use posterrang::web::AppState;

#[tokio::main]
async fn main() {
    dotenv().ok();

    // 1. Start logging
    tracing_subscriber::fmt::init();

    // 2. Connect the database and make sure the schema exists
    // mode=rwc so a first run creates the database file.
    let db_url = env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://posterrang.db?mode=rwc".to_string());
    println!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .connect(&db_url)
        .await
        .expect("Could not connect to the database");
    schema::ensure_schema(&pool)
        .await
        .expect("Could not create the attendees schema");

    // 3. Uploads directory and render engine
    let poster = PosterConfig::from_env();
    tokio::fs::create_dir_all(&poster.uploads_root)
        .await
        .expect("Could not create the uploads directory");

    let render_config = RenderConfig::from_env();
    println!(
        "Render engine: {:?} (visibility timeout {}ms, settle {}ms)",
        render_config.mode, render_config.visibility_timeout_ms, render_config.settle_delay_ms
    );

    let state = AppState {
        pool,
        render: Arc::new(RenderSession::new(render_config)),
        poster: Arc::new(poster.clone()),
    };

    // 4. Build the application
    let app = Router::new()
        .route("/invite/generate", post(invite::generate_handler))
        .route("/invite/:token", get(invite::invite_info_handler))
        .route("/admin/stats", get(admin::stats_handler))
        .route(
            "/api/referral-count/:token",
            get(share::referral_count_handler),
        )
        .route("/share/whatsapp/:token", get(share::whatsapp_share_handler))
        .nest_service("/uploads", ServeDir::new(&poster.uploads_root))
        // Uploaded photos may be up to 5MB; leave headroom for the rest
        // of the form fields.
        .layer(DefaultBodyLimit::max(6 * 1024 * 1024))
        .with_state(state);

    // 5. Start the server
    let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Could not parse host/port");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Could not bind server address");
    println!("🚀 Server running on http://{}", addr);

    axum::serve(listener, app).await.unwrap();
}
