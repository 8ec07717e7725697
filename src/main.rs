use anyhow::Result;
use kitsu_client::{config::Config, render::ShellRenderer, server};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kitsu_client=info".parse()?),
        )
        .init();

    info!("Starting Kitsu render host");

    // Load configuration from environment
    let config = Config::from_env()?;

    server::serve(config, Arc::new(ShellRenderer::default())).await
}
