//! Gradebatch API Server

use anyhow::Context;
use clap::Parser;
use gradebatch_api::{AppState, routes};
use gradebatch_config::{SystemConfig, load_config};
use gradebatch_scheduler::{Orchestrator, TimeoutSweeper};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gradebatch-server")]
#[command(about = "Batch grading job orchestrator", long_about = None)]
struct Args {
    /// Path to the KDL config file
    #[arg(short, long, env = "GRADEBATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(short, long, env = "GRADEBATCH_LISTEN")]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long, env = "GRADEBATCH_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SystemConfig::default(),
    };

    let orchestrator = Arc::new(Orchestrator::new(config.scheduler.clone()));
    for spec in config.graders {
        let grader_id = spec.grader_id.clone();
        orchestrator
            .register_grader(spec)
            .await
            .with_context(|| format!("Failed to register grader {}", grader_id))?;
    }
    info!(graders = orchestrator.pool().len(), "Grader pool ready");

    let sweeper = TimeoutSweeper::new(orchestrator.clone()).spawn();

    // Build router
    let app = routes::router(AppState::new(orchestrator))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let addr = args.listen.unwrap_or(config.server.listen);
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
