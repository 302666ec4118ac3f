use anyhow::anyhow;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley::{AppState, ServerConfig, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Install the crypto provider before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();

    let app_state = AppState::new(config)?;
    let manager = app_state.manager.clone();

    let app = routes::api::create_api_router()
        .merge(routes::voice::create_voice_router())
        .with_state(app_state);

    let listener = TcpListener::bind(&address).await?;
    info!("voice bridge listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, ending live calls");
            manager.shutdown().await;
        })
        .await?;

    Ok(())
}
