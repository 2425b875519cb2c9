//! MySQL connector, grounded in this workspace's existing `mysql_async`
//! usage: a `mysql_async::Pool` built from a connection string, checked out
//! per-op via `get_conn()`, with `columns_ref()` driving JSON projection.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Row as MyRow};

use crate::connector::{
    new_op_id, BackendKind, ConnectionConfig, Connector, ConnectorMetadata, ConnectorState,
    IsolationLevel, OpKind, OpMetrics, PoolMetrics, QueryResult, RowStream, TestConnectionResult,
    Transaction,
};
use crate::error::ConnectorError;
use crate::schema::{
    ColumnSchema, ColumnType, ConstraintKind, ConstraintSchema, IndexSchema, SchemaSnapshot, TableSchema,
};

fn state_from_tag(tag: u8) -> ConnectorState {
    match tag {
        1 => ConnectorState::Connecting,
        2 => ConnectorState::Connected,
        3 => ConnectorState::Error,
        _ => ConnectorState::Disconnected,
    }
}

fn tag_from_state(state: ConnectorState) -> u8 {
    match state {
        ConnectorState::Disconnected => 0,
        ConnectorState::Connecting => 1,
        ConnectorState::Connected => 2,
        ConnectorState::Error => 3,
    }
}

fn mysql_value_to_json(row: &MyRow, idx: usize) -> serde_json::Value {
    use mysql_async::Value;
    match row.as_ref(idx) {
        Some(Value::NULL) | None => serde_json::Value::Null,
        Some(Value::Bytes(b)) => String::from_utf8(b.clone())
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::from(hex::encode(b))),
        Some(Value::Int(i)) => serde_json::json!(i),
        Some(Value::UInt(u)) => serde_json::json!(u),
        Some(Value::Float(f)) => serde_json::json!(f),
        Some(Value::Double(d)) => serde_json::json!(d),
        Some(Value::Date(..) | Value::Time(..)) => {
            serde_json::Value::from(row.as_ref(idx).map(|v| format!("{v:?}")).unwrap_or_default())
        }
    }
}

fn row_to_json(row: &MyRow) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    for (i, column) in row.columns_ref().iter().enumerate() {
        obj.insert(column.name_str().into_owned(), mysql_value_to_json(row, i));
    }
    serde_json::Value::Object(obj)
}

fn json_to_mysql_param(value: &serde_json::Value) -> mysql_async::Value {
    use mysql_async::Value;
    match value {
        serde_json::Value::Null => Value::NULL,
        serde_json::Value::Bool(b) => Value::Int(i64::from(*b)),
        serde_json::Value::Number(n) if n.is_i64() => Value::Int(n.as_i64().unwrap_or_default()),
        serde_json::Value::Number(n) => Value::Double(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) => Value::Bytes(s.clone().into_bytes()),
        other => Value::Bytes(other.to_string().into_bytes()),
    }
}

/// The MySQL implementation of [`Connector`] (spec §4.1, backend `mysql`).
pub struct MysqlConnector {
    config: ConnectionConfig,
    pool: RwLock<Option<mysql_async::Pool>>,
    state: AtomicU8,
    metadata: RwLock<ConnectorMetadata>,
}

impl MysqlConnector {
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
            state: AtomicU8::new(tag_from_state(ConnectorState::Disconnected)),
            metadata: RwLock::new(ConnectorMetadata::default()),
        }
    }

    fn set_state(&self, state: ConnectorState) {
        self.state.store(tag_from_state(state), Ordering::SeqCst);
    }

    fn opts(config: &ConnectionConfig) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .db_name(Some(config.database.clone()))
            .user(Some(config.username.clone()))
            .pass(Some(config.password.clone()))
            .pool_opts(
                mysql_async::PoolOpts::default()
                    .with_constraints(
                        mysql_async::PoolConstraints::new(config.pool_min, config.pool_max.max(1))
                            .unwrap_or_default(),
                    ),
            )
            .into()
    }

    fn pool(&self) -> Result<mysql_async::Pool, ConnectorError> {
        self.pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ConnectorError::NotConnected {
                state: format!("{:?}", self.state()),
            })
    }

    fn build_op_metrics(op_kind: OpKind, query: &str, param_count: usize, started_at: chrono::DateTime<chrono::Utc>, duration: Duration, rows_returned: Option<u64>, rows_affected: Option<u64>) -> OpMetrics {
        OpMetrics {
            op_id: new_op_id(),
            op_kind,
            query: query.to_owned(),
            param_count,
            started_at,
            ended_at: started_at + chrono::Duration::from_std(duration).unwrap_or_default(),
            duration,
            rows_affected,
            rows_returned,
            index_used: None,
            connection_id: "mysql".to_owned(),
            error: None,
        }
    }
}

struct MysqlTransaction {
    conn: mysql_async::Conn,
    txn_open: bool,
}

#[async_trait]
impl Transaction for MysqlTransaction {
    async fn execute(
        &mut self,
        query: &str,
        params: &[serde_json::Value],
    ) -> Result<QueryResult, ConnectorError> {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let values: Vec<_> = params.iter().map(json_to_mysql_param).collect();
        let rows: Vec<MyRow> = self
            .conn
            .exec(query, mysql_async::Params::Positional(values))
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        let duration = start.elapsed();
        let data: Vec<_> = rows.iter().map(row_to_json).collect();
        Ok(QueryResult {
            success: true,
            rows_returned: Some(data.len() as u64),
            rows_affected: None,
            op_metrics: MysqlConnector::build_op_metrics(
                OpKind::classify_sql(query),
                query,
                params.len(),
                started_at,
                duration,
                Some(data.len() as u64),
                None,
            ),
            data,
            error: None,
        })
    }

    async fn commit(mut self: Box<Self>) -> Result<(), ConnectorError> {
        self.conn
            .query_drop("COMMIT")
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        self.txn_open = false;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), ConnectorError> {
        self.conn
            .query_drop("ROLLBACK")
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        self.txn_open = false;
        Ok(())
    }
}

impl Drop for MysqlTransaction {
    fn drop(&mut self) {
        if self.txn_open {
            tracing::warn!("mysql transaction dropped without commit/rollback");
        }
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn backend(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn state(&self) -> ConnectorState {
        state_from_tag(self.state.load(Ordering::SeqCst))
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        if self.state() == ConnectorState::Connected {
            return Ok(());
        }
        self.set_state(ConnectorState::Connecting);
        let pool = mysql_async::Pool::new(Self::opts(&self.config));
        match tokio::time::timeout(self.config.connect_timeout, pool.get_conn()).await {
            Ok(Ok(mut conn)) => {
                let version: String = conn
                    .query_first("SELECT VERSION()")
                    .await
                    .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?
                    .unwrap_or_default();
                drop(conn);
                *self.pool.write().unwrap_or_else(|e| e.into_inner()) = Some(pool);
                self.set_state(ConnectorState::Connected);
                let mut meta = self.metadata.write().unwrap_or_else(|e| e.into_inner());
                meta.connected_at = Some(chrono::Utc::now());
                meta.healthy = true;
                meta.server_info.insert("version".to_owned(), version);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_state(ConnectorState::Error);
                Err(ConnectorError::ConnectionRefused { reason: e.to_string() })
            }
            Err(_) => {
                self.set_state(ConnectorState::Error);
                Err(ConnectorError::ConnectionTimeout {
                    timeout_secs: self.config.connect_timeout.as_secs(),
                })
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        if let Some(pool) = self.pool.write().unwrap_or_else(|e| e.into_inner()).take() {
            pool.disconnect()
                .await
                .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        }
        self.set_state(ConnectorState::Disconnected);
        self.metadata.write().unwrap_or_else(|e| e.into_inner()).healthy = false;
        Ok(())
    }

    async fn test_connection(&self) -> Result<TestConnectionResult, ConnectorError> {
        let start = Instant::now();
        let pool = self.pool()?;
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        let _: Option<i32> = conn
            .query_first("SELECT 1")
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        Ok(TestConnectionResult {
            success: true,
            elapsed: start.elapsed(),
            server_info: self.metadata.read().unwrap_or_else(|e| e.into_inner()).server_info.clone(),
        })
    }

    async fn health_check(&self) -> ConnectorMetadata {
        match self.test_connection().await {
            Ok(_) => {
                let mut meta = self.metadata.write().unwrap_or_else(|e| e.into_inner());
                meta.healthy = true;
                meta.last_activity = Some(chrono::Utc::now());
                meta.clone()
            }
            Err(err) => {
                let mut meta = self.metadata.write().unwrap_or_else(|e| e.into_inner());
                meta.healthy = false;
                meta.last_error = Some(err.to_string());
                meta.clone()
            }
        }
    }

    async fn execute(
        &self,
        query: &str,
        params: &[serde_json::Value],
    ) -> Result<QueryResult, ConnectorError> {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let pool = self.pool()?;
        let values: Vec<_> = params.iter().map(json_to_mysql_param).collect();

        let exec = async {
            let mut conn = pool
                .get_conn()
                .await
                .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
            let rows: Vec<MyRow> = conn
                .exec(query, mysql_async::Params::Positional(values))
                .await
                .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
            Ok::<_, ConnectorError>(rows)
        };

        match tokio::time::timeout(self.config.op_timeout, exec).await {
            Ok(Ok(rows)) => {
                let duration = start.elapsed();
                let data: Vec<_> = rows.iter().map(row_to_json).collect();
                Ok(QueryResult {
                    success: true,
                    rows_returned: Some(data.len() as u64),
                    rows_affected: None,
                    op_metrics: Self::build_op_metrics(
                        OpKind::classify_sql(query),
                        query,
                        params.len(),
                        started_at,
                        duration,
                        Some(data.len() as u64),
                        None,
                    ),
                    data,
                    error: None,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectorError::QueryTimeout {
                timeout_secs: self.config.op_timeout.as_secs(),
            }),
        }
    }

    async fn stream(
        &self,
        query: &str,
        params: &[serde_json::Value],
        chunk_size: usize,
    ) -> Result<RowStream, ConnectorError> {
        // mysql_async has no native server-side cursor API exposed here; load
        // eagerly and chunk, matching the bounded-batch contract without a
        // true server cursor (documented in DESIGN.md).
        let result = self.execute(query, params).await?;
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<Result<Vec<serde_json::Value>, ConnectorError>> = result
            .data
            .chunks(chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, ConnectorError> {
        let pool = self.pool()?;
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        let level = match isolation {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        conn.query_drop(format!("SET TRANSACTION ISOLATION LEVEL {level}"))
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        conn.query_drop("START TRANSACTION")
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        Ok(Box::new(MysqlTransaction { conn, txn_open: true }))
    }

    async fn prepare(&self, sql: &str) -> Result<String, ConnectorError> {
        // mysql_async manages its own statement cache internally keyed by
        // text; we surface the deterministic key for parity with the
        // Postgres connector's API but execute_prepared re-derives it.
        Ok(crate::connector::prepared_statement_key(sql))
    }

    async fn execute_prepared(
        &self,
        name: &str,
        params: &[serde_json::Value],
    ) -> Result<QueryResult, ConnectorError> {
        let _ = name;
        let _ = params;
        Err(ConnectorError::InvalidConfiguration {
            reason: "mysql connector caches prepared statements by text via exec(); call execute() with the original SQL".to_owned(),
        })
    }

    async fn get_schema_info(&self) -> Result<SchemaSnapshot, ConnectorError> {
        let analysis_start = Instant::now();
        let pool = self.pool()?;
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;

        let pk_rows: Vec<(String, String)> = conn
            .exec(
                "SELECT table_name, column_name FROM information_schema.key_column_usage \
                 WHERE table_schema = ? AND constraint_name = 'PRIMARY'",
                (self.config.database.clone(),),
            )
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        let primary_keys: std::collections::HashSet<(String, String)> = pk_rows.into_iter().collect();

        let rows: Vec<(String, String, String, String)> = conn
            .exec(
                "SELECT table_name, column_name, data_type, is_nullable \
                 FROM information_schema.columns WHERE table_schema = ? \
                 ORDER BY table_name, ordinal_position",
                (self.config.database.clone(),),
            )
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;

        let mut tables: Vec<TableSchema> = Vec::new();
        for (table_name, column_name, data_type, is_nullable) in rows {
            let column = ColumnSchema {
                is_primary_key: primary_keys.contains(&(table_name.clone(), column_name.clone())),
                normalized_type: ColumnType::from_mysql(&data_type),
                native_type: data_type,
                name: column_name,
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
            };
            match tables.iter_mut().find(|t| t.name == table_name) {
                Some(table) => table.columns.push(column),
                None => tables.push(TableSchema {
                    name: table_name,
                    columns: vec![column],
                    indexes: Vec::new(),
                    constraints: Vec::new(),
                    approximate_row_count: None,
                }),
            }
        }

        let index_rows: Vec<(String, String, String, i8)> = conn
            .exec(
                "SELECT table_name, index_name, column_name, non_unique FROM information_schema.statistics \
                 WHERE table_schema = ? ORDER BY table_name, index_name, seq_in_index",
                (self.config.database.clone(),),
            )
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        for (table_name, index_name, column_name, non_unique) in index_rows {
            let Some(table) = tables.iter_mut().find(|t| t.name == table_name) else {
                continue;
            };
            match table.indexes.iter_mut().find(|i| i.name == index_name) {
                Some(idx) => idx.columns.push(column_name),
                None => table.indexes.push(IndexSchema {
                    name: index_name,
                    columns: vec![column_name],
                    unique: non_unique == 0,
                }),
            }
        }

        let fk_rows: Vec<(String, String, String, String, String, String, String)> = conn
            .exec(
                "SELECT kcu.table_name, kcu.constraint_name, kcu.column_name, kcu.referenced_table_name, \
                        kcu.referenced_column_name, rc.update_rule, rc.delete_rule \
                 FROM information_schema.key_column_usage kcu \
                 JOIN information_schema.referential_constraints rc \
                   ON kcu.constraint_name = rc.constraint_name AND kcu.table_schema = rc.constraint_schema \
                 WHERE kcu.table_schema = ? AND kcu.referenced_table_name IS NOT NULL",
                (self.config.database.clone(),),
            )
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        for (table_name, constraint_name, column_name, ref_table, ref_column, on_update, on_delete) in fk_rows {
            if let Some(table) = tables.iter_mut().find(|t| t.name == table_name) {
                table.constraints.push(ConstraintSchema {
                    name: constraint_name,
                    kind: ConstraintKind::ForeignKey,
                    columns: vec![column_name],
                    references_table: Some(ref_table),
                    references_columns: vec![ref_column],
                    on_update: Some(on_update),
                    on_delete: Some(on_delete),
                });
            }
        }

        let count_rows: Vec<(String, Option<i64>)> = conn
            .exec(
                "SELECT table_name, table_rows FROM information_schema.tables WHERE table_schema = ?",
                (self.config.database.clone(),),
            )
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        for (table_name, estimate) in count_rows {
            if let Some(table) = tables.iter_mut().find(|t| t.name == table_name) {
                table.approximate_row_count = estimate;
            }
        }

        let views: Vec<String> = conn
            .exec(
                "SELECT table_name FROM information_schema.views WHERE table_schema = ?",
                (self.config.database.clone(),),
            )
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;

        Ok(SchemaSnapshot {
            connector_id: self.config.id.clone(),
            database: self.config.database.clone(),
            dialect: "mysql".to_owned(),
            tables,
            views,
            routines: Vec::new(),
            sequences: Vec::new(),
            server_info: self.metadata().server_info,
            analyzed_at: chrono::Utc::now(),
            analysis_duration: analysis_start.elapsed(),
        })
    }

    fn performance_metrics(&self) -> PoolMetrics {
        PoolMetrics {
            total_ops: 0,
            failed_ops: 0,
            avg_op_duration_micros: 0,
            active_connections: 0,
            idle_connections: 0,
            max_connections: self.config.pool_max,
            min_connections: self.config.pool_min,
            created_at: Duration::default(),
        }
    }

    fn metadata(&self) -> ConnectorMetadata {
        self.metadata.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
