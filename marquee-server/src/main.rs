//! # Marquee Server
//!
//! Movie catalog front end. Routes proxy catalog metadata and hand all
//! slow or untrusted scraping work to a bounded worker pool so the request
//! path never runs it inline.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marquee_server::{config::ServerConfig, routes, state::AppState};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "marquee-server")]
#[command(about = "Movie catalog front end with a bounded scraping worker pool")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "MARQUEE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen host override
    #[arg(long, env = "MARQUEE_HOST")]
    host: Option<String>,

    /// Listen port override
    #[arg(long, env = "MARQUEE_PORT")]
    port: Option<u16>,

    /// Worker pool size override
    #[arg(long, env = "MARQUEE_POOL_SIZE")]
    pool_size: Option<usize>,

    /// Per-task deadline override, e.g. "30s" or "500ms"
    #[arg(long, env = "MARQUEE_TASK_DEADLINE", value_parser = humantime::parse_duration)]
    task_deadline: Option<Duration>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(size) = args.pool_size {
        config.core.pool.size = size;
    }
    if let Some(deadline) = args.task_deadline {
        config.core.pool.task_deadline_ms = deadline.as_millis() as u64;
    }

    let state = AppState::new(&config).context("initialize task-execution core")?;
    let router = routes::router(state.clone());

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("Starting Marquee catalog server on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Settle anything still queued before the process exits.
    state.pool.shutdown().await;
    info!("Marquee catalog server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
        return;
    }
    info!("shutdown signal received");
}
