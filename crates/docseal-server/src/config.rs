//! Server configuration for `DocSeal`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `DOCSEAL_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use docseal_core::templates::DEFAULT_MAX_UPLOAD_BYTES;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// JSON-lines audit log, if file audit is enabled.
    pub audit_file_path: Option<PathBuf>,
    /// Largest accepted template upload, in bytes.
    pub max_upload_bytes: usize,
    /// JSON array of signers to seed the identity directory with.
    pub identities_file: Option<PathBuf>,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// One file per key under a directory.
    Filesystem { path: PathBuf },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `PORT` — port to bind on, binds to `0.0.0.0`
    /// - `DOCSEAL_BIND_ADDR` — full bind address (overrides `PORT`, default `127.0.0.1:8300`)
    /// - `DOCSEAL_STORAGE` — `memory` or `fs` (default `memory`)
    /// - `DOCSEAL_STORAGE_PATH` — directory for the `fs` backend (default `./data`)
    /// - `DOCSEAL_LOG_LEVEL` — log filter (default `info`)
    /// - `DOCSEAL_AUDIT_FILE` — audit log path (optional)
    /// - `DOCSEAL_MAX_UPLOAD_BYTES` — template size ceiling (default 10 MiB)
    /// - `DOCSEAL_IDENTITIES_FILE` — signer directory seed (optional)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let default_addr = SocketAddr::from(([127, 0, 0, 1], 8300));
        let bind_addr = if let Some(addr) = var("DOCSEAL_BIND_ADDR") {
            addr.parse().unwrap_or(default_addr)
        } else if let Some(port) = var("PORT") {
            SocketAddr::from(([0, 0, 0, 0], port.parse().unwrap_or(8300)))
        } else {
            default_addr
        };

        let storage_path =
            PathBuf::from(var("DOCSEAL_STORAGE_PATH").unwrap_or_else(|| "./data".to_owned()));
        let storage_backend = match var("DOCSEAL_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "fs" | "file" | "filesystem" => StorageBackendType::Filesystem { path: storage_path },
            _ => StorageBackendType::Memory,
        };

        let max_upload_bytes = var("DOCSEAL_MAX_UPLOAD_BYTES")
            .and_then(|v| v.parse().ok())
            .filter(|limit: &usize| *limit > 0)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        Self {
            bind_addr,
            storage_backend,
            log_level: var("DOCSEAL_LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            audit_file_path: var("DOCSEAL_AUDIT_FILE").map(PathBuf::from),
            max_upload_bytes,
            identities_file: var("DOCSEAL_IDENTITIES_FILE").map(PathBuf::from),
        }
    }
}
