use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use xero_kpi::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xero_kpi=info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("xero-kpi v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let state: SharedState = Arc::new(AppState::from_config(config.clone())?);
    info!("OAuth callback served at {}", config.callback_path());

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server ready ✓, open http://{addr}/xero/connect to connect Xero");
    axum::serve(listener, app).await?;

    Ok(())
}
