//! Inkpot - session service for a personal content site

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkpot::{
    api::{self, AppState},
    config::Config,
    render::HostRender,
    session::{create_storage, SessionManager},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkpot=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Inkpot...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize session storage
    let storage = create_storage(&config.session).await?;
    tracing::info!("Session storage initialized: {:?}", config.session.driver);

    let sessions = SessionManager::new(storage, config.session.max_duration())
        .with_refresh_on_access(config.session.refresh_on_access);

    let host = HostRender::global(&config.site.host);
    tracing::info!("Public host: {}", host.host);

    let state = AppState::new(sessions, &config.session.cookie_name, &config.site.host);

    // Build router
    let app = api::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
