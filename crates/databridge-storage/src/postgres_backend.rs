//! `PostgreSQL` storage backend — a single key-value table behind a `sqlx` pool.
//!
//! This backend exists for deployments that already run a managed `PostgreSQL`
//! instance and would rather not operate a separate `RocksDB`/redb data
//! directory for the barrier's encrypted blobs. It stores opaque keys and
//! values in one table; no SQL is ever built from caller-controlled data.

use sqlx::PgPool;

use crate::{StorageBackend, StorageError};

const CREATE_TABLE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS databridge_kv (
    key   TEXT PRIMARY KEY,
    value BYTEA NOT NULL
)";

/// A storage backend backed by a `PostgreSQL` table, via `sqlx`.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend").finish_non_exhaustive()
    }
}

impl PostgresBackend {
    /// Connect to `PostgreSQL` and ensure the key-value table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                path: database_url.to_owned(),
                reason: e.to_string(),
            })?;

        sqlx::query(CREATE_TABLE_SQL)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::Open {
                path: database_url.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    /// Build a backend from an already-constructed pool (reused by tests and
    /// by callers who already manage a shared pool elsewhere).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StorageBackend for PostgresBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM databridge_kv WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        sqlx::query(
            r"INSERT INTO databridge_kv (key, value) VALUES ($1, $2)
              ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM databridge_kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let pattern = format!("{}%", prefix.replace('%', r"\%").replace('_', r"\_"));
        sqlx::query_scalar::<_, String>(
            "SELECT key FROM databridge_kv WHERE key LIKE $1 ESCAPE '\\' ORDER BY key",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::List {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })
    }
}
