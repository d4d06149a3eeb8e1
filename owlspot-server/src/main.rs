//! owlspot binary — CLI bootstrap over the `owlspot-core` engine and the
//! `owlspot-http` adapter.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use owlspot_core::{EngineConfig, IncrementalBuilder};
use owlspot_http::{router, AppContext};

/// Incremental semantic code index engine.
#[derive(Parser)]
#[command(name = "owlspot", version, about, long_about = None)]
struct Cli {
    /// Directory that holds each target's persisted index state.
    #[arg(long, default_value = ".owlspot-cache")]
    cache_dir: PathBuf,

    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost).
    #[arg(long)]
    bind_all: bool,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("owlspot=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    info!(model = config.model_name.as_str(), batch_size = config.batch_size, "starting owlspot");

    let builder = Arc::new(IncrementalBuilder::new(cli.cache_dir.clone(), config.clone()));
    let ctx = Arc::new(AppContext::new(builder, &config));

    let app = router(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let explicit_port: Option<u16> = std::env::var("PORT").ok().and_then(|p| p.parse().ok());

    let listener = if let Some(port) = explicit_port {
        tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await.unwrap_or_else(|e| {
            error!(port, error = %e, "could not bind to port");
            eprintln!("PORT={port} was set explicitly. Choose a different port.");
            std::process::exit(1);
        })
    } else {
        const BASE: u16 = 8432;
        const RANGE: u16 = 10;
        let mut found = None;
        for port in BASE..BASE + RANGE {
            if let Ok(l) = tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
                found = Some(l);
                break;
            }
        }
        found.unwrap_or_else(|| {
            error!(range_start = BASE, range_end = BASE + RANGE - 1, "no free port found");
            eprintln!("try: PORT=<port> owlspot");
            std::process::exit(1);
        })
    };

    let port = listener.local_addr().unwrap().port();
    info!(port, "http://{bind_addr}:{port}");
    eprintln!("OWLSPOT_PORT={port}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}
