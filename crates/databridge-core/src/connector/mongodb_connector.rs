//! MongoDB connector — the one backend neither the teacher nor the rest of
//! the retrieved pack already wires up; adopted here using the official
//! `mongodb` driver, the natural ecosystem choice for a BSON document
//! store, matching every other connector's "use the one real driver crate"
//! pattern.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use mongodb::bson::{self, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;

use crate::connector::{
    new_op_id, BackendKind, ConnectionConfig, Connector, ConnectorMetadata, ConnectorState,
    IsolationLevel, OpKind, OpMetrics, PoolMetrics, QueryResult, RowStream, TestConnectionResult,
    Transaction,
};
use crate::error::ConnectorError;
use crate::query_builder::DocumentOp;
use crate::schema::{ColumnSchema, ColumnType, IndexSchema, SchemaSnapshot, TableSchema};

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

fn bson_to_json(doc: &Document) -> serde_json::Value {
    serde_json::to_value(doc).unwrap_or(serde_json::Value::Null)
}

fn parse_query(raw: &str) -> Result<DocumentOp, ConnectorError> {
    serde_json::from_str(raw).map_err(|e| ConnectorError::InvalidConfiguration {
        reason: format!("mongo op must be a JSON-encoded DocumentOp: {e}"),
    })
}

fn json_to_document(value: &serde_json::Value) -> Result<Document, ConnectorError> {
    bson::to_document(value).map_err(|e| ConnectorError::InvalidConfiguration {
        reason: format!("invalid document filter/update: {e}"),
    })
}

/// The MongoDB implementation of [`Connector`] (spec §4.1, backend
/// `mongodb`). `execute`/`stream` accept their `query` argument as a
/// JSON-encoded [`DocumentOp`] rather than SQL text, matching the spec's
/// "document pipeline" dialect.
pub struct MongoConnector {
    config: ConnectionConfig,
    client: RwLock<Option<Client>>,
    state: AtomicU8,
    metadata: RwLock<ConnectorMetadata>,
}

impl MongoConnector {
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
            state: AtomicU8::new(tag_from_state(ConnectorState::Disconnected)),
            metadata: RwLock::new(ConnectorMetadata::default()),
        }
    }

    fn set_state(&self, state: ConnectorState) {
        self.state.store(tag_from_state(state), Ordering::SeqCst);
    }

    fn connection_uri(config: &ConnectionConfig) -> String {
        let scheme = if config.option("srv") == Some("true") {
            "mongodb+srv"
        } else {
            "mongodb"
        };
        if config.username.is_empty() {
            format!("{scheme}://{}:{}/{}", config.host, config.port, config.database)
        } else {
            format!(
                "{scheme}://{}:{}@{}:{}/{}",
                config.username, config.password, config.host, config.port, config.database
            )
        }
    }

    fn client(&self) -> Result<Client, ConnectorError> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ConnectorError::NotConnected {
                state: format!("{:?}", self.state()),
            })
    }

    fn database(&self, client: &Client) -> mongodb::Database {
        client.database(&self.config.database)
    }
}

struct MongoTransaction {
    session: mongodb::ClientSession,
    finished: bool,
    database_name: String,
}

#[async_trait]
impl Transaction for MongoTransaction {
    async fn execute(
        &mut self,
        query: &str,
        params: &[serde_json::Value],
    ) -> Result<QueryResult, ConnectorError> {
        let _ = params;
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let op = parse_query(query)?;
        let client = self.session.client().clone();
        let db = client.database(&self.database_name);

        let data = match op {
            DocumentOp::InsertMany { collection, documents } => {
                let docs: Result<Vec<Document>, _> = documents.iter().map(json_to_document).collect();
                db.collection::<Document>(&collection)
                    .insert_many(docs?)
                    .session(&mut self.session)
                    .await
                    .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
                Vec::new()
            }
            other => {
                return Err(ConnectorError::InvalidConfiguration {
                    reason: format!("unsupported op inside a mongo transaction: {other:?}"),
                })
            }
        };

        Ok(QueryResult {
            success: true,
            rows_returned: Some(data.len() as u64),
            rows_affected: None,
            op_metrics: OpMetrics {
                op_id: new_op_id(),
                op_kind: OpKind::Write,
                query: query.to_owned(),
                param_count: 0,
                started_at,
                ended_at: chrono::Utc::now(),
                duration: start.elapsed(),
                rows_affected: None,
                rows_returned: Some(data.len() as u64),
                index_used: None,
                connection_id: "mongodb".to_owned(),
                error: None,
            },
            data,
            error: None,
        })
    }

    async fn commit(mut self: Box<Self>) -> Result<(), ConnectorError> {
        self.session
            .commit_transaction()
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), ConnectorError> {
        self.session
            .abort_transaction()
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for MongoTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("mongo transaction session dropped without commit/abort");
        }
    }
}

#[async_trait]
impl Connector for MongoConnector {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn backend(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    fn state(&self) -> ConnectorState {
        state_from_tag(self.state.load(Ordering::SeqCst))
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        if self.state() == ConnectorState::Connected {
            return Ok(());
        }
        self.set_state(ConnectorState::Connecting);
        let uri = Self::connection_uri(&self.config);
        let connect = async {
            let mut opts = ClientOptions::parse(&uri)
                .await
                .map_err(|e| ConnectorError::InvalidConfiguration { reason: e.to_string() })?;
            opts.max_pool_size = Some(self.config.pool_max as u32);
            opts.min_pool_size = Some(self.config.pool_min as u32);
            let client = Client::with_options(opts)
                .map_err(|e| ConnectorError::InvalidConfiguration { reason: e.to_string() })?;
            client
                .database(&self.config.database)
                .run_command(bson::doc! { "ping": 1 })
                .await
                .map_err(|e| ConnectorError::ConnectionRefused { reason: e.to_string() })?;
            Ok::<_, ConnectorError>(client)
        };

        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(client)) => {
                *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
                self.set_state(ConnectorState::Connected);
                let mut meta = self.metadata.write().unwrap_or_else(|e| e.into_inner());
                meta.connected_at = Some(chrono::Utc::now());
                meta.healthy = true;
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_state(ConnectorState::Error);
                Err(e)
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
        self.client.write().unwrap_or_else(|e| e.into_inner()).take();
        self.set_state(ConnectorState::Disconnected);
        self.metadata.write().unwrap_or_else(|e| e.into_inner()).healthy = false;
        Ok(())
    }

    async fn test_connection(&self) -> Result<TestConnectionResult, ConnectorError> {
        let start = Instant::now();
        let client = self.client()?;
        self.database(&client)
            .run_command(bson::doc! { "ping": 1 })
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
        let _ = params;
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let client = self.client()?;
        let db = self.database(&client);
        let op = parse_query(query)?;
        let op_kind = OpKind::classify_document(&op);

        let run = async {
            match &op {
                DocumentOp::Find { collection, filter, sort, limit, skip } => {
                    let mut cursor = {
                        let mut builder = db.collection::<Document>(collection).find(json_to_document(filter)?);
                        if let Some(sort) = sort {
                            builder = builder.sort(json_to_document(sort)?);
                        }
                        if let Some(limit) = limit {
                            builder = builder.limit(*limit);
                        }
                        if let Some(skip) = skip {
                            builder = builder.skip(*skip as u64);
                        }
                        builder.await.map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?
                    };
                    let mut data = Vec::new();
                    while let Some(doc) = cursor
                        .try_next()
                        .await
                        .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?
                    {
                        data.push(bson_to_json(&doc));
                    }
                    Ok::<_, ConnectorError>((data, None))
                }
                DocumentOp::Aggregate { collection, pipeline } => {
                    let stages: Result<Vec<Document>, _> = pipeline.iter().map(json_to_document).collect();
                    let mut cursor = db
                        .collection::<Document>(collection)
                        .aggregate(stages?)
                        .await
                        .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
                    let mut data = Vec::new();
                    while let Some(doc) = cursor
                        .try_next()
                        .await
                        .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?
                    {
                        data.push(bson_to_json(&doc));
                    }
                    Ok((data, None))
                }
                DocumentOp::InsertMany { collection, documents } => {
                    let docs: Result<Vec<Document>, _> = documents.iter().map(json_to_document).collect();
                    let result = db
                        .collection::<Document>(collection)
                        .insert_many(docs?)
                        .await
                        .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
                    Ok((Vec::new(), Some(result.inserted_ids.len() as u64)))
                }
                DocumentOp::UpdateMany { collection, filter, update } => {
                    let result = db
                        .collection::<Document>(collection)
                        .update_many(json_to_document(filter)?, json_to_document(update)?)
                        .await
                        .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
                    Ok((Vec::new(), Some(result.modified_count)))
                }
                DocumentOp::DeleteMany { collection, filter } => {
                    let result = db
                        .collection::<Document>(collection)
                        .delete_many(json_to_document(filter)?)
                        .await
                        .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
                    Ok((Vec::new(), Some(result.deleted_count)))
                }
                DocumentOp::CreateCollection { collection } => {
                    db.create_collection(collection)
                        .await
                        .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
                    Ok((Vec::new(), None))
                }
                DocumentOp::DropCollection { collection } => {
                    db.collection::<Document>(collection)
                        .drop()
                        .await
                        .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
                    Ok((Vec::new(), None))
                }
            }
        };

        match tokio::time::timeout(self.config.op_timeout, run).await {
            Ok(Ok((data, rows_affected))) => {
                let duration = start.elapsed();
                Ok(QueryResult {
                    success: true,
                    rows_returned: Some(data.len() as u64),
                    rows_affected,
                    op_metrics: OpMetrics {
                        op_id: new_op_id(),
                        op_kind,
                        query: query.to_owned(),
                        param_count: 0,
                        started_at,
                        ended_at: chrono::Utc::now(),
                        duration,
                        rows_affected,
                        rows_returned: Some(data.len() as u64),
                        index_used: None,
                        connection_id: "mongodb".to_owned(),
                        error: None,
                    },
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
        let _ = params;
        let client = self.client()?;
        let db = self.database(&client);
        let op = parse_query(query)?;

        let DocumentOp::Find { collection, filter, sort, limit, skip } = op else {
            return Err(ConnectorError::InvalidConfiguration {
                reason: "stream() only supports a find op".to_owned(),
            });
        };

        let mut builder = db.collection::<Document>(&collection).find(json_to_document(&filter)?);
        if let Some(sort) = sort {
            builder = builder.sort(json_to_document(&sort)?);
        }
        if let Some(limit) = limit {
            builder = builder.limit(limit);
        }
        if let Some(skip) = skip {
            builder = builder.skip(skip as u64);
        }
        let cursor = builder
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;

        let chunk_size = chunk_size.max(1);
        let batched = cursor
            .map(|r| r.map(|doc| bson_to_json(&doc)).map_err(|e| ConnectorError::Unknown { reason: e.to_string() }))
            .chunks(chunk_size)
            .map(|chunk| chunk.into_iter().collect::<Result<Vec<_>, _>>());

        Ok(Box::pin(batched))
    }

    async fn begin_transaction(
        &self,
        _isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, ConnectorError> {
        let client = self.client()?;
        let mut session = client
            .start_session()
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        session
            .start_transaction()
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;
        Ok(Box::new(MongoTransaction {
            session,
            finished: false,
            database_name: self.config.database.clone(),
        }))
    }

    async fn prepare(&self, _sql: &str) -> Result<String, ConnectorError> {
        Err(ConnectorError::InvalidConfiguration {
            reason: "mongodb is a document store; prepared statements are not applicable".to_owned(),
        })
    }

    async fn execute_prepared(
        &self,
        _name: &str,
        _params: &[serde_json::Value],
    ) -> Result<QueryResult, ConnectorError> {
        Err(ConnectorError::InvalidConfiguration {
            reason: "mongodb is a document store; prepared statements are not applicable".to_owned(),
        })
    }

    async fn get_schema_info(&self) -> Result<SchemaSnapshot, ConnectorError> {
        /// Upper bound on documents sampled per collection to infer field
        /// shape (spec §4.8 "sample up to a bounded document count").
        const SAMPLE_SIZE: i64 = 100;

        let analysis_start = Instant::now();
        let client = self.client()?;
        let db = self.database(&client);
        let names = db
            .list_collection_names()
            .await
            .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;

        let mut tables = Vec::new();
        for name in names {
            let collection = db.collection::<Document>(&name);

            // Mongo has no fixed schema; sample a bounded number of
            // documents and merge field presence/types across the sample so
            // nullability reflects fields absent from some documents (spec
            // §4.8 "infer field types and nullability").
            let mut cursor = collection
                .find(bson::doc! {})
                .limit(SAMPLE_SIZE)
                .await
                .map_err(|e| ConnectorError::Unknown { reason: e.to_string() })?;

            let mut fields: std::collections::BTreeMap<String, (ColumnType, String, usize)> = std::collections::BTreeMap::new();
            let mut sampled = 0usize;
            while let Some(doc) = cursor.try_next().await.map_err(|e| ConnectorError::Unknown { reason: e.to_string() })? {
                sampled += 1;
                for (key, value) in doc.iter() {
                    let native = bson_type_name(value);
                    let entry = fields
                        .entry(key.clone())
                        .or_insert_with(|| (ColumnType::from_bson(native), native.to_owned(), 0));
                    entry.2 += 1;
                }
            }

            let columns = fields
                .into_iter()
                .map(|(key, (normalized_type, native_type, present_count))| ColumnSchema {
                    is_primary_key: key == "_id",
                    nullable: present_count < sampled,
                    name: key,
                    normalized_type,
                    native_type,
                })
                .collect();

            let mut indexes = Vec::new();
            if let Ok(mut index_cursor) = collection.list_indexes().await {
                while let Ok(Some(model)) = index_cursor.try_next().await {
                    let columns: Vec<String> = model.keys.keys().map(ToString::to_string).collect();
                    let unique = model.options.as_ref().and_then(|o| o.unique).unwrap_or(false);
                    let index_name = model
                        .options
                        .as_ref()
                        .and_then(|o| o.name.clone())
                        .unwrap_or_else(|| columns.join("_"));
                    indexes.push(IndexSchema {
                        name: index_name,
                        columns,
                        unique,
                    });
                }
            }

            let approximate_row_count = collection.estimated_document_count().await.ok().map(|n| n as i64);

            tables.push(TableSchema {
                name,
                columns,
                indexes,
                constraints: Vec::new(),
                approximate_row_count,
            });
        }

        Ok(SchemaSnapshot {
            connector_id: self.config.id.clone(),
            database: self.config.database.clone(),
            dialect: "mongodb".to_owned(),
            tables,
            views: Vec::new(),
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

fn bson_type_name(value: &bson::Bson) -> &'static str {
    match value {
        bson::Bson::Boolean(_) => "bool",
        bson::Bson::Int32(_) => "int",
        bson::Bson::Int64(_) => "long",
        bson::Bson::Double(_) => "double",
        bson::Bson::Decimal128(_) => "decimal",
        bson::Bson::String(_) => "string",
        bson::Bson::Document(_) => "object",
        bson::Bson::Array(_) => "array",
        bson::Bson::DateTime(_) => "date",
        bson::Bson::Binary(_) => "binData",
        _ => "unknown",
    }
}
