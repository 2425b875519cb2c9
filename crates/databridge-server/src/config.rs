//! Server-level configuration for `DataBridge`.
//!
//! Wraps [`databridge_core::config::DataBridgeConfig`] (the engine knobs)
//! with the handful of settings that belong to the HTTP process itself:
//! bind address, log level, and storage backend selection.

use std::net::SocketAddr;

use databridge_core::config::DataBridgeConfig;

/// Server process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type for the vault barrier.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g. `info`, `debug`, `warn`).
    pub log_level: String,
    /// Whether to skip `mlock` (for development without root/`CAP_IPC_LOCK`).
    pub disable_mlock: bool,
    /// Engine-level knobs shared with `databridge-core` consumers.
    pub core: DataBridgeConfig,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: String },
    /// Redb persistent storage.
    Redb { path: String },
    /// PostgreSQL persistent storage.
    Postgres { url: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (Railway/Heroku convention, binds `0.0.0.0`)
    /// - `DATABRIDGE_BIND_ADDR` — full bind address (overrides `PORT`, default `127.0.0.1:8420`)
    /// - `DATABRIDGE_STORAGE_BACKEND` — `memory`, `rocksdb`, `redb`, or `postgres` (default `memory`)
    /// - `DATABRIDGE_STORAGE_PATH` — path for persistent backends (default `./data`)
    /// - `DATABASE_URL` — PostgreSQL connection string (required when storage backend is `postgres`)
    /// - `DATABRIDGE_LOG_LEVEL` — log filter (default `info`)
    /// - `DATABRIDGE_DISABLE_MLOCK` — skip `mlockall` for dev environments (default `false`)
    ///
    /// All other knobs (prepared-statement cache, session idle timeout,
    /// audit/backup retention, key recovery shares/threshold) are loaded
    /// via [`DataBridgeConfig::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = if let Ok(addr) = std::env::var("DATABRIDGE_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8420)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8420);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8420))
        };

        let core = DataBridgeConfig::from_env();

        let storage_path = std::env::var("DATABRIDGE_STORAGE_PATH").unwrap_or_else(|_| "./data".to_owned());

        let storage_backend = match core.storage_backend.to_lowercase().as_str() {
            "rocksdb" => StorageBackendType::RocksDb { path: storage_path },
            "redb" => StorageBackendType::Redb { path: storage_path },
            "postgres" | "postgresql" => {
                let url = std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/databridge".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level = std::env::var("DATABRIDGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let disable_mlock = std::env::var("DATABRIDGE_DISABLE_MLOCK")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            bind_addr,
            storage_backend,
            log_level,
            disable_mlock,
            core,
        }
    }
}
