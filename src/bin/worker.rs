use tracing_subscriber::EnvFilter;

use facet_api::config::Settings;
use facet_api::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("facet_api=debug")
        }))
        .init();

    let settings = Settings::from_env();
    tracing::info!("facet-worker starting");
    Supervisor::new(settings).await?.run().await
}
