use std::sync::Arc;

use anyhow::Result;
use relay_lib::{bridge::FlatFileBridge, config::Settings, ws_router, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    // RUST_LOG wins over the configured default.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let bridge = Arc::new(FlatFileBridge::new(&settings.data_dir)?);
    let state = AppState::new(bridge, settings);

    let listener = TcpListener::bind(state.settings.bind_addr).await?;
    tracing::info!(addr = %state.settings.bind_addr, "chat relay listening");

    let app = ws_router::create_router(state);
    axum::serve(listener, app).await?;

    Ok(())
}
