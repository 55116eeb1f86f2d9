mod cli;
mod dashboard;
mod files;
mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Instant;
use tabflow::{ChromeLauncher, Engine};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use files::ScreenshotStore;
use routes::AppState;

/// Ports tried after the configured one before giving up.
const PORT_FALLBACKS: u16 = 10;

async fn bind(host: &str, port: u16) -> Result<(TcpListener, u16)> {
    for p in port..port.saturating_add(PORT_FALLBACKS) {
        match TcpListener::bind((host, p)).await {
            Ok(listener) => return Ok((listener, p)),
            Err(e) => warn!(port = p, error = %e, "Port unavailable"),
        }
    }
    anyhow::bail!(
        "could not bind to any port {}-{}",
        port,
        port.saturating_add(PORT_FALLBACKS - 1)
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tabflow=debug,scraper=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    tokio::fs::create_dir_all(&cli.screenshots_dir)
        .await
        .with_context(|| format!("creating {}", cli.screenshots_dir.display()))?;

    let (events, _) = broadcast::channel(64);
    let engine = Engine::new(
        Arc::new(ChromeLauncher::new(cli.browser_config())),
        cli.engine_config(),
    )
    .with_adapter(cli.adapter())
    .with_live_feed(events.clone());

    let app = routes::router(AppState {
        engine,
        store: ScreenshotStore::new(&cli.screenshots_dir),
        events,
        started: Instant::now(),
    });

    let (listener, port) = bind(&cli.host, cli.port).await?;
    info!(
        host = %cli.host,
        port,
        screenshots = %cli.screenshots_dir.display(),
        headless = cli.headless,
        "Scraper listening"
    );
    info!("Dashboard at http://localhost:{}/debug", port);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
