//! Connector Engine (C5) — the uniform per-backend contract (spec §4.1):
//! pooling, streaming cursors, prepared statements, transactional scopes,
//! health supervision, background cleanup, graceful shutdown.
//!
//! Three concrete connectors are provided: [`postgres::PostgresConnector`],
//! [`mysql::MysqlConnector`], [`mongodb::MongoConnector`] — grounded in the
//! working driver code already present in this workspace's CLI
//! (`tokio_postgres`/`postgres_native_tls`, `mysql_async`) plus the official
//! `mongodb` driver, adopted per SPEC_FULL.md's "enrich from the rest of the
//! pack" rule for the one backend neither the teacher nor the rest of the
//! pack already covers.

pub mod mongodb_connector;
pub mod mysql_connector;
pub mod pool;
pub mod postgres_connector;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ConnectorError;

/// Backend tags recognized across the registry, connector, and schema
/// modules (spec §6 "Connection URI grammar").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Postgres,
    MySql,
    MongoDb,
    Sqlite,
    Oracle,
    MsSql,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
            Self::MongoDb => "mongodb",
            Self::Sqlite => "sqlite",
            Self::Oracle => "oracle",
            Self::MsSql => "mssql",
        }
    }

    /// Whether this backend has a concrete [`Connector`] implementation in
    /// this crate, versus being recognized-but-unimplemented (spec §4.1
    /// supplemental: sqlite/oracle/mssql are classified by the registry but
    /// carry no connector).
    #[must_use]
    pub fn has_connector(&self) -> bool {
        matches!(self, Self::Postgres | Self::MySql | Self::MongoDb)
    }

    #[must_use]
    pub fn is_sql_dialect(&self) -> bool {
        !matches!(self, Self::MongoDb)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor for a single connection target (spec §3
/// `ConnectionConfig`). Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    pub backend: BackendKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
    pub pool_min: usize,
    pub pool_max: usize,
    /// Open key→value map for backend-specific knobs (statement-cache size,
    /// charset, compressors, server settings, …).
    pub options: HashMap<String, String>,
}

impl ConnectionConfig {
    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Mutable companion to a live connector (spec §3 `ConnectorMetadata`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorMetadata {
    pub connected_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_activity: Option<chrono::DateTime<chrono::Utc>>,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub server_info: HashMap<String, String>,
}

impl Default for ConnectorMetadata {
    fn default() -> Self {
        Self {
            connected_at: None,
            last_activity: None,
            healthy: false,
            last_error: None,
            server_info: HashMap::new(),
        }
    }
}

/// Aggregate pool counters (spec §3 `PoolMetrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub total_ops: u64,
    pub failed_ops: u64,
    pub avg_op_duration_micros: u64,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub max_connections: usize,
    pub min_connections: usize,
    #[serde(with = "duration_secs")]
    pub created_at: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// Closed op-kind classification (spec GLOSSARY, §4.1 "Op-kind detection").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Read,
    Write,
    Delete,
    Schema,
    Admin,
    Transaction,
    Utility,
}

impl OpKind {
    /// Classify a SQL statement by its leading keyword.
    #[must_use]
    pub fn classify_sql(query: &str) -> Self {
        let first_word = query
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match first_word.as_str() {
            "select" | "show" | "explain" | "with" => Self::Read,
            "insert" | "update" => Self::Write,
            "delete" | "truncate" => Self::Delete,
            "create" | "drop" | "alter" => Self::Schema,
            "begin" | "commit" | "rollback" | "savepoint" => Self::Transaction,
            "grant" | "revoke" => Self::Admin,
            _ => Self::Utility,
        }
    }

    /// Classify a document-store operation from the descriptor's discriminant
    /// field name (spec §4.1: "presence of pipeline/filter/update/documents
    /// fields classifies it").
    #[must_use]
    pub fn classify_document(op: &crate::query_builder::DocumentOp) -> Self {
        use crate::query_builder::DocumentOp;
        match op {
            DocumentOp::Find { .. } | DocumentOp::Aggregate { .. } => Self::Read,
            DocumentOp::InsertMany { .. } | DocumentOp::UpdateMany { .. } => Self::Write,
            DocumentOp::DeleteMany { .. } => Self::Delete,
            DocumentOp::CreateCollection { .. } | DocumentOp::DropCollection { .. } => Self::Schema,
        }
    }

    /// The permission this op-kind requires at the secure wrapper (spec
    /// §4.6).
    #[must_use]
    pub fn required_permission(&self) -> crate::policy::Permission {
        use crate::policy::Permission;
        match self {
            Self::Read => Permission::Read,
            Self::Write => Permission::Write,
            Self::Delete => Permission::Delete,
            Self::Schema => Permission::Schema,
            Self::Admin => Permission::Admin,
            Self::Transaction | Self::Utility => Permission::Read,
        }
    }
}

/// Per-operation observability record (spec §3 `OpMetrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpMetrics {
    pub op_id: String,
    pub op_kind: OpKind,
    pub query: String,
    pub param_count: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub duration: Duration,
    pub rows_affected: Option<u64>,
    pub rows_returned: Option<u64>,
    pub index_used: Option<bool>,
    pub connection_id: String,
    pub error: Option<String>,
}

/// A bounded ring buffer of recent [`OpMetrics`], trimmed by the cleanup
/// loop (spec §4.1 "Background loops").
#[derive(Debug, Default)]
pub struct MetricsRing {
    entries: RwLock<VecDeque<OpMetrics>>,
    capacity: usize,
}

impl MetricsRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub async fn push(&self, metrics: OpMetrics) {
        let mut guard = self.entries.write().await;
        guard.push_back(metrics);
        while guard.len() > self.capacity {
            guard.pop_front();
        }
    }

    pub async fn trim(&self) {
        let mut guard = self.entries.write().await;
        while guard.len() > self.capacity {
            guard.pop_front();
        }
    }

    pub async fn snapshot(&self) -> Vec<OpMetrics> {
        self.entries.read().await.iter().cloned().collect()
    }
}

/// A cached prepared statement (spec §3 `PreparedEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedEntry {
    pub name: String,
    pub statement: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_used: chrono::DateTime<chrono::Utc>,
    pub use_count: u64,
}

/// Transaction isolation levels accepted by [`Connector::begin_transaction`]
/// (spec §4.1), mapped onto backend vocabulary by each implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// The per-connector state machine (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Outcome of [`Connector::test_connection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConnectionResult {
    pub success: bool,
    pub elapsed: Duration,
    pub server_info: HashMap<String, String>,
}

/// The result of a single [`Connector::execute`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub data: Vec<serde_json::Value>,
    pub rows_affected: Option<u64>,
    pub rows_returned: Option<u64>,
    pub op_metrics: OpMetrics,
    pub error: Option<String>,
}

/// A batch of rows yielded by [`Connector::stream`].
pub type RowBatch = Vec<serde_json::Value>;

/// A lazy, finite, non-restartable batched cursor (spec §4.1 "Streaming
/// policy").
pub type RowStream = BoxStream<'static, Result<RowBatch, ConnectorError>>;

/// A scoped transaction handle (spec §4.1 `transaction(isolation)`).
///
/// Callers must call exactly one of [`commit`](Transaction::commit) /
/// [`rollback`](Transaction::rollback) to finalize the scope. Concrete
/// implementations additionally roll back on drop without finalization,
/// following the "scoped-resource idiom" design note — for
/// [`postgres_connector`]/[`mysql_connector`] this falls out of the
/// underlying driver's own `Drop` impl; [`mongodb_connector`] implements it
/// explicitly since `mongodb::ClientSession` has no such guarantee.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(
        &mut self,
        query: &str,
        params: &[serde_json::Value],
    ) -> Result<QueryResult, ConnectorError>;

    async fn commit(self: Box<Self>) -> Result<(), ConnectorError>;

    async fn rollback(self: Box<Self>) -> Result<(), ConnectorError>;
}

/// The uniform contract every backend connector implements (spec §4.1).
#[async_trait]
pub trait Connector: Send + Sync {
    /// The stable id of the [`ConnectionConfig`] this connector was built
    /// from.
    fn id(&self) -> &str;

    fn backend(&self) -> BackendKind;

    fn state(&self) -> ConnectorState;

    /// Acquire the pool, probe the server, populate server info, and start
    /// the health and cleanup loops. Idempotent when already `Connected`.
    async fn connect(&self) -> Result<(), ConnectorError>;

    /// Signal shutdown, wait up to a bounded grace for in-flight ops, roll
    /// back open transactions, stop workers, release the pool. Always safe
    /// to call after a partial failure.
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    async fn test_connection(&self) -> Result<TestConnectionResult, ConnectorError>;

    /// A cheap probe with a hard timeout. Never raises — failures are
    /// folded into the returned metadata.
    async fn health_check(&self) -> ConnectorMetadata;

    async fn execute(
        &self,
        query: &str,
        params: &[serde_json::Value],
    ) -> Result<QueryResult, ConnectorError>;

    async fn stream(
        &self,
        query: &str,
        params: &[serde_json::Value],
        chunk_size: usize,
    ) -> Result<RowStream, ConnectorError>;

    async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, ConnectorError>;

    /// SQL-dialect backends only; document backends return
    /// [`ConnectorError::InvalidConfiguration`].
    async fn prepare(&self, sql: &str) -> Result<String, ConnectorError>;

    async fn execute_prepared(
        &self,
        name: &str,
        params: &[serde_json::Value],
    ) -> Result<QueryResult, ConnectorError>;

    /// Run a backend-specific catalog walk; returns a partial
    /// [`crate::schema::SchemaSnapshot`] that [`crate::schema::SchemaDiscoverer`]
    /// assembles into the final normalized snapshot.
    async fn get_schema_info(&self) -> Result<crate::schema::SchemaSnapshot, ConnectorError>;

    /// Aggregate, observational-only pool metrics.
    fn performance_metrics(&self) -> PoolMetrics;

    fn metadata(&self) -> ConnectorMetadata;
}

/// Deterministic key for the prepared-statement cache (spec §4.1: "keyed by
/// a deterministic function of the statement text"). Stable across process
/// restarts since it hashes only the statement text (Open Question #2,
/// resolved — see DESIGN.md).
#[must_use]
pub fn prepared_statement_key(sql: &str) -> String {
    use sha2::{Digest, Sha256};
    format!("ps_{}", hex::encode(&Sha256::digest(sql.as_bytes())[..8]))
}

/// LRU + TTL cache of [`PreparedEntry`] records, shared plumbing for every
/// SQL-dialect connector (spec §4.1 "Prepared-statement cache").
///
/// Generic over the backend-specific server-side handle `H` (e.g. a
/// `tokio_postgres::Statement`) so eviction can deallocate it.
pub struct PreparedCache<H> {
    capacity: usize,
    ttl: Duration,
    entries: RwLock<HashMap<String, (PreparedEntry, H)>>,
    /// Insertion/use order, most-recently-used at the back, for LRU
    /// eviction once [`Self::capacity`] is exceeded.
    order: RwLock<VecDeque<String>>,
}

impl<H> PreparedCache<H> {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
        }
    }

    /// Look up a cached handle by statement key, bumping its use count and
    /// LRU position on hit.
    pub async fn get(&self, key: &str) -> Option<String>
    where
        H: Clone,
    {
        let mut entries = self.entries.write().await;
        let (entry, _) = entries.get_mut(key)?;
        entry.use_count += 1;
        entry.last_used = chrono::Utc::now();
        let name = entry.name.clone();
        drop(entries);

        let mut order = self.order.write().await;
        order.retain(|k| k != key);
        order.push_back(key.to_owned());
        Some(name)
    }

    /// Insert a freshly-prepared statement, evicting expired entries first
    /// and then the least-recently-used entry if over capacity. Returns any
    /// evicted handle so the caller can deallocate it server-side.
    pub async fn insert(&self, key: String, entry: PreparedEntry, handle: H) -> Vec<H> {
        let mut evicted = self.evict_expired().await;

        {
            let mut entries = self.entries.write().await;
            entries.insert(key.clone(), (entry, handle));
        }
        {
            let mut order = self.order.write().await;
            order.retain(|k| *k != key);
            order.push_back(key);
        }

        evicted.extend(self.evict_over_capacity().await);
        evicted
    }

    async fn evict_expired(&self) -> Vec<H> {
        let now = chrono::Utc::now();
        let ttl = self.ttl;
        let expired_keys: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, (entry, _))| {
                    now.signed_duration_since(entry.last_used)
                        .to_std()
                        .map(|age| age > ttl)
                        .unwrap_or(false)
                })
                .map(|(k, _)| k.clone())
                .collect()
        };
        self.remove_keys(&expired_keys).await
    }

    async fn evict_over_capacity(&self) -> Vec<H> {
        let mut to_remove = Vec::new();
        {
            let entries = self.entries.read().await;
            let mut order = self.order.write().await;
            while entries.len() - to_remove.len() > self.capacity {
                if let Some(oldest) = order.pop_front() {
                    to_remove.push(oldest);
                } else {
                    break;
                }
            }
        }
        self.remove_keys(&to_remove).await
    }

    async fn remove_keys(&self, keys: &[String]) -> Vec<H> {
        if keys.is_empty() {
            return Vec::new();
        }
        let mut removed = Vec::new();
        let mut entries = self.entries.write().await;
        let mut order = self.order.write().await;
        for key in keys {
            if let Some((_, handle)) = entries.remove(key) {
                removed.push(handle);
            }
            order.retain(|k| k != key);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Generates a fresh op id for [`OpMetrics`].
#[must_use]
pub fn new_op_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Shared counter used by connectors to track in-flight operations for
/// graceful shutdown (spec §8 scenario 6: "no new ops accepted… in-flight
/// ops either complete or cancel within the grace").
#[derive(Debug, Default)]
pub struct InFlightGuardCounter(AtomicU64);

impl InFlightGuardCounter {
    #[must_use]
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn enter(&self) -> InFlightGuard<'_> {
        self.0.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self)
    }
}

pub struct InFlightGuard<'a>(&'a InFlightGuardCounter);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn op_kind_classifies_sql_keywords() {
        assert_eq!(OpKind::classify_sql("select 1"), OpKind::Read);
        assert_eq!(OpKind::classify_sql("  INSERT into t values (1)"), OpKind::Write);
        assert_eq!(OpKind::classify_sql("update t set x=1"), OpKind::Write);
        assert_eq!(OpKind::classify_sql("delete from t"), OpKind::Delete);
        assert_eq!(OpKind::classify_sql("DROP TABLE t"), OpKind::Schema);
        assert_eq!(OpKind::classify_sql("begin"), OpKind::Transaction);
        assert_eq!(OpKind::classify_sql("vacuum"), OpKind::Utility);
    }

    #[test]
    fn prepared_statement_key_is_deterministic() {
        let a = prepared_statement_key("select * from t where id = $1");
        let b = prepared_statement_key("select * from t where id = $1");
        let c = prepared_statement_key("select * from t where id = $2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn prepared_cache_evicts_lru_at_capacity() {
        let cache: PreparedCache<u32> = PreparedCache::new(2, Duration::from_secs(600));
        let now = chrono::Utc::now();
        let mk = |name: &str| PreparedEntry {
            name: name.to_owned(),
            statement: "select 1".to_owned(),
            created_at: now,
            last_used: now,
            use_count: 0,
        };

        cache.insert("a".into(), mk("a"), 1).await;
        cache.insert("b".into(), mk("b"), 2).await;
        // Touch "a" so "b" becomes the LRU entry.
        cache.get("a").await;
        let evicted = cache.insert("c".into(), mk("c"), 3).await;

        assert_eq!(evicted, vec![2]);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn metrics_ring_trims_to_capacity() {
        let ring = MetricsRing::new(3);
        for i in 0..5 {
            ring.push(sample_metrics(i)).await;
        }
        let snapshot = ring.snapshot().await;
        assert_eq!(snapshot.len(), 3);
    }

    fn sample_metrics(i: u32) -> OpMetrics {
        let now = chrono::Utc::now();
        OpMetrics {
            op_id: i.to_string(),
            op_kind: OpKind::Read,
            query: "select 1".to_owned(),
            param_count: 0,
            started_at: now,
            ended_at: now,
            duration: Duration::from_millis(1),
            rows_affected: None,
            rows_returned: Some(1),
            index_used: None,
            connection_id: "c1".to_owned(),
            error: None,
        }
    }
}
