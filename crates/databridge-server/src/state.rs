//! Shared application state for the `DataBridge` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the barrier, seal manager, connector
//! registry, secure dispatcher, credential store, policy set, audit trail,
//! config backup engine, and connection monitor.

use std::sync::Arc;

use tokio::sync::RwLock;

use databridge_core::audit::AuditTrail;
use databridge_core::barrier::Barrier;
use databridge_core::config_backup::ConfigBackupEngine;
use databridge_core::credential::CredentialStore;
use databridge_core::monitor::Monitor;
use databridge_core::policy::PolicySet;
use databridge_core::registry::ConnectorRegistry;
use databridge_core::seal::SealManager;
use databridge_core::secure_wrapper::SecureDispatcher;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// The encryption barrier.
    pub barrier: Arc<Barrier>,
    /// Seal/unseal lifecycle manager.
    pub seal_manager: Arc<SealManager>,
    /// Connector registry (C6) — live connector pools keyed by id.
    pub registry: Arc<ConnectorRegistry>,
    /// Secure dispatch entry point (C9/C10) — resolves credentials, enforces
    /// policy, and builds audited sessions over registered connectors.
    pub dispatcher: Arc<SecureDispatcher>,
    /// Stored connector credentials.
    pub credentials: Arc<CredentialStore>,
    /// Active access policy set — swappable at runtime via reload.
    pub policies: RwLock<Arc<PolicySet>>,
    /// Hash-chained audit trail (C1/C2/C3).
    pub audit: Arc<AuditTrail>,
    /// Configuration file backup/restore engine (C4).
    pub config_backup: Arc<ConfigBackupEngine>,
    /// Connection health and performance monitor (C11).
    pub monitor: Arc<Monitor>,
    /// Idle timeout applied to sessions built by `dispatcher`.
    pub session_idle_timeout: std::time::Duration,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
