//! `DocSeal` server entry point.
//!
//! Bootstraps the storage backend, audit backends, and identity directory,
//! then starts the Axum HTTP server with graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use docseal_core::audit::AuditManager;
use docseal_core::audit_file::FileAuditBackend;
use docseal_core::clock::SystemClock;
use docseal_core::credentials::MemoryIdentityProvider;
use docseal_storage::{MemoryBackend, StorageBackend};

use docseal_server::build_router;
use docseal_server::config::{ServerConfig, StorageBackendType};
use docseal_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "DocSeal starting");

    let state = build_app_state(&config).await?;
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "DocSeal server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("DocSeal server stopped");
    Ok(())
}

/// Build the shared application state.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "fs-backend")]
        StorageBackendType::Filesystem { path } => {
            info!(path = %path.display(), "using filesystem storage");
            Arc::new(
                docseal_storage::FileBackend::open(path)
                    .context("failed to open filesystem storage")?,
            )
        }
        #[cfg(not(feature = "fs-backend"))]
        StorageBackendType::Filesystem { .. } => {
            anyhow::bail!("filesystem backend requested but feature 'fs-backend' is not enabled");
        }
    };

    let audit_manager = Arc::new(AuditManager::new());
    if let Some(path) = &config.audit_file_path {
        let backend = FileAuditBackend::open(path)
            .await
            .context("failed to open audit log")?;
        audit_manager.add_backend(Arc::new(backend)).await;
        info!(path = %path.display(), "file audit backend registered");
    } else {
        warn!("no audit backend configured; signing attempts will not be recorded");
    }

    let identities = match &config.identities_file {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let provider = MemoryIdentityProvider::from_json(&bytes)
                .with_context(|| format!("invalid identities file {}", path.display()))?;
            info!(signers = provider.len().await, "identity directory loaded");
            provider
        }
        None => {
            warn!("no identities file configured; every request will be unauthorized");
            MemoryIdentityProvider::new()
        }
    };

    Ok(Arc::new(AppState::new(
        storage,
        Arc::new(identities),
        audit_manager,
        Arc::new(SystemClock),
        config.max_upload_bytes,
    )))
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
