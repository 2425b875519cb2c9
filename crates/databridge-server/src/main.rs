//! `DataBridge` server entry point.
//!
//! Bootstraps the storage backend, barrier, seal manager, connector
//! registry, secure dispatcher, audit trail, config backup engine, and
//! connection monitor, then starts the Axum HTTP server with graceful
//! shutdown. The audit trail's commit worker and backup timer run alongside
//! the server and are drained on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use databridge_core::audit::AuditTrail;
use databridge_core::barrier::Barrier;
use databridge_core::config_backup::ConfigBackupEngine;
use databridge_core::credential::CredentialStore;
use databridge_core::monitor::{Monitor, MonitorThresholds};
use databridge_core::policy::PolicySet;
use databridge_core::registry::ConnectorRegistry;
use databridge_core::secure_wrapper::SecureDispatcher;
use databridge_core::seal::SealManager;
use databridge_storage::MemoryBackend;

use databridge_server::config::{ServerConfig, StorageBackendType};
use databridge_server::hardening;
use databridge_server::routes;
use databridge_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Production hardening runs before logging is initialized, so failures
    // are reported with eprintln.
    apply_hardening(&config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "DataBridge starting");

    let state = build_app_state(&config).await?;

    state
        .audit
        .start()
        .await
        .context("failed to start audit trail")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "DataBridge server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx, shutdown_rx))
        .await
        .context("server error")?;

    info!("shutting down audit trail");
    state.audit.shutdown().await;

    info!("DataBridge server stopped");
    Ok(())
}

/// Build the shared application state: storage backend, barrier, seal
/// manager, connector registry, secure dispatcher, credential store, policy
/// set, audit trail, config backup engine, and connection monitor.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let storage: Arc<dyn databridge_storage::StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackendType::RocksDb { path } => {
            info!(path = %path, "using RocksDB storage");
            Arc::new(
                databridge_storage::RocksDbBackend::open(path)
                    .context("failed to open RocksDB storage")?,
            )
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackendType::RocksDb { .. } => {
            anyhow::bail!("RocksDB backend requested but feature 'rocksdb-backend' is not enabled");
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "using redb storage");
            Arc::new(
                databridge_storage::RedbBackend::open(path).context("failed to open redb storage")?,
            )
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            anyhow::bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
        #[cfg(feature = "postgres-backend")]
        StorageBackendType::Postgres { url } => {
            info!("using PostgreSQL storage");
            Arc::new(
                databridge_storage::PostgresBackend::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL storage")?,
            )
        }
        #[cfg(not(feature = "postgres-backend"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!("PostgreSQL backend requested but feature 'postgres-backend' is not enabled");
        }
    };

    let barrier = Arc::new(Barrier::new(storage));
    let seal_manager = Arc::new(SealManager::new(Arc::clone(&barrier)));

    let registry = Arc::new(ConnectorRegistry::new(
        config.core.prepared_cache_size,
        config.core.prepared_cache_ttl,
    ));
    let credentials = Arc::new(CredentialStore::new(Arc::clone(&barrier)));
    let policies = Arc::new(PolicySet::new(Vec::new()));

    let audit_dir = &config.core.audit_dir;
    let audit = Arc::new(AuditTrail::new(
        audit_dir.join("audit.jsonl"),
        audit_dir.join("state.json"),
        audit_dir.join("backups"),
        Arc::clone(&barrier),
        Duration::from_secs(15 * 60),
    ));

    let dispatcher = Arc::new(SecureDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&credentials),
        Arc::clone(&policies),
        Arc::clone(&audit),
        config.core.session_idle_timeout,
    ));

    let config_backup = Arc::new(ConfigBackupEngine::new(
        Arc::clone(&barrier),
        config.core.config_backup_paths.clone(),
        config.core.config_backup_exclude.clone(),
        config.core.max_config_snapshots,
        config.core.config_retention_days,
    ));

    let monitor = Arc::new(Monitor::new(MonitorThresholds::default()));

    Ok(Arc::new(AppState {
        barrier,
        seal_manager,
        registry,
        dispatcher,
        credentials,
        policies: RwLock::new(policies),
        audit,
        config_backup,
        monitor,
        session_idle_timeout: config.core.session_idle_timeout,
    }))
}

/// Build the Axum router with all routes and hardening middleware.
fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>, _shutdown_rx: watch::Receiver<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
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
    let _ = shutdown_tx.send(true);
}

/// Apply production hardening before logging is initialized.
#[allow(clippy::print_stderr)]
fn apply_hardening(config: &ServerConfig) {
    if let Err(e) = hardening::disable_core_dumps() {
        eprintln!("WARNING: failed to disable core dumps: {e}");
    }

    if config.disable_mlock {
        eprintln!("WARNING: mlock disabled via DATABRIDGE_DISABLE_MLOCK — key material may be swapped to disk");
    } else if let Err(e) = hardening::lock_memory() {
        eprintln!("WARNING: failed to lock memory: {e} (set DATABRIDGE_DISABLE_MLOCK=true for dev)");
    }
}
