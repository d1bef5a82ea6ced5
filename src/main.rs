use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use facet_api::config::Settings;
use facet_api::{AppState, handlers, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("facet_api=debug,tower_http=debug")
        }))
        .init();

    let settings = Settings::from_env();
    let conf = store::config_connection(&settings).await?;
    tracing::info!(
        "connected to config db {} at {}",
        settings.config_db,
        settings.redis_url
    );

    let port = settings.port;
    let state = AppState { settings, conf };

    let app = Router::new()
        // Slice-and-dice queries
        .route("/analytics/{name}/", get(handlers::analytics::browse))
        // Transaction publishing
        .route("/resource/{channel}/", post(handlers::resource::publish))
        // Health
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("facet-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
