//! Connector Registry (C6) — detects a backend tag from a URI or host:port
//! pair and constructs the matching [`Connector`] (spec §4.2).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::connector::mongodb_connector::MongoConnector;
use crate::connector::mysql_connector::MysqlConnector;
use crate::connector::postgres_connector::PostgresConnector;
use crate::connector::{BackendKind, ConnectionConfig, Connector};
use crate::error::RegistryError;

/// Well-known default ports used for port-based backend detection (spec
/// §4.2 "port map").
const PORT_MAP: &[(u16, BackendKind)] = &[
    (5432, BackendKind::Postgres),
    (3306, BackendKind::MySql),
    (27017, BackendKind::MongoDb),
    (1433, BackendKind::MsSql),
    (1521, BackendKind::Oracle),
];

/// Detect a [`BackendKind`] from a connection string.
///
/// Accepts either a full URI (`postgresql://…`, `mysql://…`,
/// `mongodb://…`/`mongodb+srv://…`) or a bare `host:port`, in which case
/// detection falls back to [`PORT_MAP`].
///
/// # Errors
///
/// Returns [`RegistryError::UndetectedBackend`] if neither the scheme nor
/// the port identifies a known backend.
pub fn detect_backend(target: &str) -> Result<BackendKind, RegistryError> {
    if let Ok(url) = Url::parse(target) {
        let backend = match url.scheme() {
            "postgres" | "postgresql" => Some(BackendKind::Postgres),
            "mysql" => Some(BackendKind::MySql),
            "mongodb" | "mongodb+srv" => Some(BackendKind::MongoDb),
            "sqlite" => Some(BackendKind::Sqlite),
            "oracle" => Some(BackendKind::Oracle),
            "sqlserver" | "mssql" => Some(BackendKind::MsSql),
            _ => None,
        };
        if let Some(backend) = backend {
            return Ok(backend);
        }
        if let Some(port) = url.port() {
            if let Some((_, backend)) = PORT_MAP.iter().find(|(p, _)| *p == port) {
                return Ok(*backend);
            }
        }
    }

    if let Some((_, port_str)) = target.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            if let Some((_, backend)) = PORT_MAP.iter().find(|(p, _)| *p == port) {
                return Ok(*backend);
            }
        }
    }

    Err(RegistryError::UndetectedBackend {
        target: target.to_owned(),
    })
}

/// A backend candidate surfaced by [`discover`] for a reachable port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryCandidate {
    pub port: u16,
    pub backend: BackendKind,
}

/// Active discovery (spec §4.2 "Active discovery"): attempt a bounded,
/// parallel TCP connect to every well-known port in [`PORT_MAP`] against
/// `host`; each port that accepts a connection within `timeout_per_port`
/// contributes a candidate. Connection failures and timeouts are silently
/// excluded, never surfaced as errors — discovery only ever narrows or
/// widens the candidate set, it cannot fail outright.
pub async fn discover(host: &str, timeout_per_port: Duration) -> Vec<DiscoveryCandidate> {
    let probes = PORT_MAP.iter().map(|&(port, backend)| {
        let host = host.to_owned();
        async move {
            let addr = format!("{host}:{port}");
            match timeout(timeout_per_port, TcpStream::connect(&addr)).await {
                Ok(Ok(_)) => Some(DiscoveryCandidate { port, backend }),
                _ => None,
            }
        }
    });
    futures::future::join_all(probes).await.into_iter().flatten().collect()
}

/// Backend-specific defaults patched into a [`ConnectionConfig`]'s open
/// options map before construction (spec §4.2 "Optimization hook"). Additive
/// only: an already-present key is never overwritten, so a caller-supplied
/// value always wins.
#[must_use]
pub fn backend_defaults(backend: BackendKind) -> HashMap<String, String> {
    let mut defaults = HashMap::new();
    match backend {
        BackendKind::Postgres => {
            defaults.insert("statement_cache_size".to_owned(), "256".to_owned());
            defaults.insert("application_name".to_owned(), "databridge".to_owned());
        }
        BackendKind::MySql => {
            defaults.insert("statement_cache_size".to_owned(), "256".to_owned());
            defaults.insert("charset".to_owned(), "utf8mb4".to_owned());
        }
        BackendKind::MongoDb => {
            defaults.insert("compressors".to_owned(), "zstd".to_owned());
        }
        BackendKind::Sqlite | BackendKind::Oracle | BackendKind::MsSql => {}
    }
    defaults
}

/// Apply [`backend_defaults`] into `config.options`, additively (spec §4.2:
/// "This patch is additive and may be disabled").
pub fn apply_optimization_hook(config: &mut ConnectionConfig, enabled: bool) {
    if !enabled {
        return;
    }
    for (key, value) in backend_defaults(config.backend) {
        config.options.entry(key).or_insert(value);
    }
}

/// Constructs and caches live [`Connector`]s keyed by their
/// [`ConnectionConfig::id`] (spec §4.2).
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: std::sync::RwLock<HashMap<String, Arc<dyn Connector>>>,
    prepared_cache_size: usize,
    prepared_cache_ttl: Duration,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new(prepared_cache_size: usize, prepared_cache_ttl: Duration) -> Self {
        Self {
            connectors: std::sync::RwLock::new(HashMap::new()),
            prepared_cache_size,
            prepared_cache_ttl,
        }
    }

    /// Build (but do not connect) a connector for `config`, dispatching on
    /// `config.backend`, and register it under `config.id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownBackend`] if the backend has no
    /// connector implementation (spec §4.1: sqlite/oracle/mssql are
    /// recognized but unimplemented).
    pub fn register(&self, config: ConnectionConfig) -> Result<Arc<dyn Connector>, RegistryError> {
        if !config.backend.has_connector() {
            return Err(RegistryError::UnknownBackend {
                tag: config.backend.as_str().to_owned(),
            });
        }

        let id = config.id.clone();
        let connector: Arc<dyn Connector> = match config.backend {
            BackendKind::Postgres => Arc::new(PostgresConnector::new(
                config,
                self.prepared_cache_size,
                self.prepared_cache_ttl,
            )),
            BackendKind::MySql => Arc::new(MysqlConnector::new(config)),
            BackendKind::MongoDb => Arc::new(MongoConnector::new(config)),
            BackendKind::Sqlite | BackendKind::Oracle | BackendKind::MsSql => unreachable!(
                "has_connector() already rejected backends without an implementation"
            ),
        };

        self.connectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::clone(&connector));
        Ok(connector)
    }

    /// Parse `target` (a URI or host:port), detect its backend, and build a
    /// connector for it in one step.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UndetectedBackend`]/[`RegistryError::MalformedUri`]
    /// from detection, or [`RegistryError::UnknownBackend`] from
    /// construction.
    pub fn register_from_uri(
        &self,
        id: impl Into<String>,
        target: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        tls: bool,
        pool_min: usize,
        pool_max: usize,
    ) -> Result<Arc<dyn Connector>, RegistryError> {
        let backend = detect_backend(target)?;
        let url = Url::parse(target).map_err(|e| RegistryError::MalformedUri { reason: e.to_string() })?;

        let config = ConnectionConfig {
            id: id.into(),
            backend,
            host: url.host_str().unwrap_or("localhost").to_owned(),
            port: url.port().unwrap_or_else(|| default_port(backend)),
            database: url.path().trim_start_matches('/').to_owned(),
            username: username.into(),
            password: password.into(),
            tls,
            connect_timeout: Duration::from_secs(10),
            op_timeout: Duration::from_secs(30),
            pool_min,
            pool_max,
            options: HashMap::new(),
        };

        self.register_with_config(config, true)
    }

    /// Like [`Self::register`], but first runs the optimization hook over
    /// `config.options` (spec §4.2 "before construction, the registry may
    /// patch the config's open key→value map with backend-specific
    /// defaults").
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`].
    pub fn register_with_config(
        &self,
        mut config: ConnectionConfig,
        apply_optimizations: bool,
    ) -> Result<Arc<dyn Connector>, RegistryError> {
        apply_optimization_hook(&mut config, apply_optimizations);
        self.register(config)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.write().unwrap_or_else(|e| e.into_inner()).remove(id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.connectors.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }
}

fn default_port(backend: BackendKind) -> u16 {
    PORT_MAP
        .iter()
        .find(|(_, b)| *b == backend)
        .map(|(p, _)| *p)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_backend_from_scheme() {
        assert_eq!(detect_backend("postgresql://localhost/db").unwrap(), BackendKind::Postgres);
        assert_eq!(detect_backend("mysql://localhost/db").unwrap(), BackendKind::MySql);
        assert_eq!(detect_backend("mongodb+srv://cluster.example/db").unwrap(), BackendKind::MongoDb);
    }

    #[test]
    fn detects_backend_from_bare_port() {
        assert_eq!(detect_backend("localhost:5432").unwrap(), BackendKind::Postgres);
        assert_eq!(detect_backend("localhost:27017").unwrap(), BackendKind::MongoDb);
    }

    #[test]
    fn unrecognized_target_is_undetected() {
        assert!(detect_backend("localhost:9999").is_err());
    }

    #[test]
    fn optimization_hook_is_additive_only() {
        let mut config = ConnectionConfig {
            id: "x".to_owned(),
            backend: BackendKind::Postgres,
            host: "localhost".to_owned(),
            port: 5432,
            database: "db".to_owned(),
            username: "u".to_owned(),
            password: "p".to_owned(),
            tls: false,
            connect_timeout: Duration::from_secs(1),
            op_timeout: Duration::from_secs(1),
            pool_min: 1,
            pool_max: 1,
            options: HashMap::from([("statement_cache_size".to_owned(), "42".to_owned())]),
        };
        apply_optimization_hook(&mut config, true);
        assert_eq!(config.option("statement_cache_size"), Some("42"));
        assert_eq!(config.option("application_name"), Some("databridge"));
    }

    #[test]
    fn optimization_hook_disabled_leaves_options_untouched() {
        let mut config = ConnectionConfig {
            id: "x".to_owned(),
            backend: BackendKind::Postgres,
            host: "localhost".to_owned(),
            port: 5432,
            database: "db".to_owned(),
            username: "u".to_owned(),
            password: "p".to_owned(),
            tls: false,
            connect_timeout: Duration::from_secs(1),
            op_timeout: Duration::from_secs(1),
            pool_min: 1,
            pool_max: 1,
            options: HashMap::new(),
        };
        apply_optimization_hook(&mut config, false);
        assert!(config.options.is_empty());
    }

    #[tokio::test]
    async fn discover_against_unreachable_host_yields_no_candidates() {
        // TEST-NET-1, reserved for documentation; never routable.
        let candidates = discover("192.0.2.1", Duration::from_millis(50)).await;
        assert!(candidates.is_empty());
    }

    #[test]
    fn register_rejects_unimplemented_backend() {
        let registry = ConnectorRegistry::new(256, Duration::from_secs(600));
        let config = ConnectionConfig {
            id: "x".to_owned(),
            backend: BackendKind::Oracle,
            host: "localhost".to_owned(),
            port: 1521,
            database: "db".to_owned(),
            username: "u".to_owned(),
            password: "p".to_owned(),
            tls: false,
            connect_timeout: Duration::from_secs(1),
            op_timeout: Duration::from_secs(1),
            pool_min: 1,
            pool_max: 1,
            options: HashMap::new(),
        };
        let err = registry.register(config).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownBackend { .. }));
    }
}
