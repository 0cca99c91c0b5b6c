use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

use crate::{
    config::Config,
    gateway::{Annotator, RetryPolicy, VisionClient},
};

mod config;
mod error;
mod gateway;
mod models;
mod render;
mod routes;
mod upload;

pub struct AppState {
    pub annotator: Annotator,
    pub upload_dir: PathBuf,
    pub public_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "image_labeler=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::debug!(
        endpoint = %config.vision_endpoint,
        upload_dir = %config.upload_dir.display(),
        max_upload_bytes = config.max_upload_bytes,
        "loaded configuration"
    );

    let http = reqwest::Client::new();
    let detector = VisionClient::from_config(&config, http)
        .context("failed to set up the label detection client")?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("cannot create {}", config.upload_dir.display()))?;

    let state = Arc::new(AppState {
        annotator: Annotator::new(Arc::new(detector), RetryPolicy::from_config(&config)),
        upload_dir: config.upload_dir.clone(),
        public_dir: config.public_dir.clone(),
        max_upload_bytes: config.max_upload_bytes,
    });

    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;

    tracing::info!("🚀 Server listening on http://localhost:{}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
