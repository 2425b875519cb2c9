//! Schema Discoverer (C8) — catalog introspection, type normalization, and
//! diffing across backends (spec §4.8).
//!
//! Each [`crate::connector::Connector`] contributes a raw
//! [`SchemaSnapshot`] via `get_schema_info`; this module normalizes column
//! types into the closed [`ColumnType`] enum and computes structural diffs
//! between two snapshots (e.g. before/after a migration, or across two
//! environments).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::connector::Connector;
use crate::error::SchemaError;

/// A backend-agnostic normalization of a column's native type (spec §4.8
/// "type normalization").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    Text,
    Json,
    Timestamp,
    Binary,
    Unknown,
}

impl ColumnType {
    /// Normalize a Postgres `pg_type` name.
    #[must_use]
    pub fn from_postgres(native: &str) -> Self {
        match native {
            "bool" => Self::Boolean,
            "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" => Self::Integer,
            "float4" | "float8" | "numeric" | "decimal" | "real" | "double precision" => Self::Float,
            "text" | "varchar" | "character varying" | "bpchar" | "char" | "name" => Self::Text,
            "json" | "jsonb" => Self::Json,
            "timestamp" | "timestamptz" | "date" | "time" => Self::Timestamp,
            "bytea" => Self::Binary,
            _ => Self::Unknown,
        }
    }

    /// Normalize a MySQL `information_schema.DATA_TYPE` name.
    #[must_use]
    pub fn from_mysql(native: &str) -> Self {
        match native {
            "tinyint" | "smallint" | "mediumint" | "int" | "bigint" => Self::Integer,
            "float" | "double" | "decimal" => Self::Float,
            "varchar" | "char" | "text" | "mediumtext" | "longtext" | "tinytext" => Self::Text,
            "json" => Self::Json,
            "datetime" | "timestamp" | "date" | "time" => Self::Timestamp,
            "blob" | "binary" | "varbinary" => Self::Binary,
            _ => Self::Unknown,
        }
    }

    /// Normalize a BSON type name reported for a sampled Mongo field.
    #[must_use]
    pub fn from_bson(native: &str) -> Self {
        match native {
            "bool" => Self::Boolean,
            "int" | "long" => Self::Integer,
            "double" | "decimal" => Self::Float,
            "string" => Self::Text,
            "object" | "array" => Self::Json,
            "date" => Self::Timestamp,
            "binData" => Self::Binary,
            _ => Self::Unknown,
        }
    }
}

/// A single column within a [`TableSchema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub native_type: String,
    pub normalized_type: ColumnType,
    pub nullable: bool,
    pub is_primary_key: bool,
}

/// An index reported by the backend's catalog (or, for Mongo, by
/// `list_indexes`) (spec §4.1 `get_schema_info`, §4.8 "indexes").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// The kind of a [`ConstraintSchema`] (spec §4.8 "primary/unique/foreign/check").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

/// A table constraint, including the referential action rules for foreign
/// keys (spec §4.8 "match/update/delete rules").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSchema {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub references_table: Option<String>,
    pub references_columns: Vec<String>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

/// A table (or a Mongo collection, whose "columns" come from field
/// sampling rather than a catalog) as introspected from a live backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSchema>,
    /// Approximate row count from catalog statistics, not a live `COUNT(*)`
    /// (spec §4.8 "approximate row counts").
    #[serde(default)]
    pub approximate_row_count: Option<i64>,
}

/// The full catalog snapshot a connector contributes (spec §3
/// `SchemaSnapshot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub connector_id: String,
    pub database: String,
    /// Per-backend dialect tag (spec §3 "per-backend dialect tag"), e.g.
    /// `"postgresql"`, `"mysql"`, `"mongodb"`.
    pub dialect: String,
    pub tables: Vec<TableSchema>,
    #[serde(default)]
    pub views: Vec<String>,
    #[serde(default)]
    pub routines: Vec<String>,
    #[serde(default)]
    pub sequences: Vec<String>,
    #[serde(default)]
    pub server_info: std::collections::HashMap<String, String>,
    pub analyzed_at: chrono::DateTime<chrono::Utc>,
    #[serde(with = "duration_millis", default)]
    pub analysis_duration: std::time::Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// A column present on both sides of a diff but differing in shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDelta {
    pub column: String,
    pub before: ColumnSchema,
    pub after: ColumnSchema,
}

impl PartialEq for ColumnSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.normalized_type == other.normalized_type
            && self.nullable == other.nullable
            && self.is_primary_key == other.is_primary_key
    }
}

/// The structural difference between two [`SchemaSnapshot`]s (spec §4.8
/// "diff").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub tables_only_in_before: Vec<String>,
    pub tables_only_in_after: Vec<String>,
    pub changed_tables: BTreeMap<String, Vec<ColumnDelta>>,
}

impl SchemaDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables_only_in_before.is_empty()
            && self.tables_only_in_after.is_empty()
            && self.changed_tables.is_empty()
    }
}

/// Runs catalog introspection against a connector and computes diffs
/// between snapshots (spec §4.8).
pub struct SchemaDiscoverer;

impl SchemaDiscoverer {
    /// Fetch a normalized snapshot from a live connector.
    ///
    /// # Errors
    ///
    /// Propagates [`SchemaError::Connector`] if the underlying catalog walk
    /// fails.
    pub async fn discover(connector: &dyn Connector) -> Result<SchemaSnapshot, SchemaError> {
        connector.get_schema_info().await.map_err(SchemaError::Connector)
    }

    /// Compute the structural diff `before -> after`.
    #[must_use]
    pub fn diff(before: &SchemaSnapshot, after: &SchemaSnapshot) -> SchemaDiff {
        let before_tables: BTreeMap<_, _> = before.tables.iter().map(|t| (t.name.clone(), t)).collect();
        let after_tables: BTreeMap<_, _> = after.tables.iter().map(|t| (t.name.clone(), t)).collect();

        let mut diff = SchemaDiff::default();

        for name in before_tables.keys() {
            if !after_tables.contains_key(name) {
                diff.tables_only_in_before.push(name.clone());
            }
        }
        for name in after_tables.keys() {
            if !before_tables.contains_key(name) {
                diff.tables_only_in_after.push(name.clone());
            }
        }

        for (name, before_table) in &before_tables {
            let Some(after_table) = after_tables.get(name) else {
                continue;
            };
            let before_cols: BTreeMap<_, _> =
                before_table.columns.iter().map(|c| (c.name.clone(), c)).collect();
            let after_cols: BTreeMap<_, _> = after_table.columns.iter().map(|c| (c.name.clone(), c)).collect();

            let mut deltas = Vec::new();
            for (col_name, before_col) in &before_cols {
                if let Some(after_col) = after_cols.get(col_name) {
                    if *before_col != *after_col {
                        deltas.push(ColumnDelta {
                            column: col_name.clone(),
                            before: (*before_col).clone(),
                            after: (*after_col).clone(),
                        });
                    }
                }
            }
            if !deltas.is_empty() {
                diff.changed_tables.insert(name.clone(), deltas);
            }
        }

        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: ColumnType, nullable: bool) -> ColumnSchema {
        ColumnSchema {
            name: name.to_owned(),
            native_type: "text".to_owned(),
            normalized_type: ty,
            nullable,
            is_primary_key: false,
        }
    }

    fn table(name: &str, columns: Vec<ColumnSchema>) -> TableSchema {
        TableSchema {
            name: name.to_owned(),
            columns,
            indexes: vec![],
            constraints: vec![],
            approximate_row_count: None,
        }
    }

    fn snapshot(tables: Vec<TableSchema>) -> SchemaSnapshot {
        SchemaSnapshot {
            connector_id: "c1".to_owned(),
            database: "db".to_owned(),
            dialect: "postgresql".to_owned(),
            tables,
            views: vec![],
            routines: vec![],
            sequences: vec![],
            server_info: std::collections::HashMap::new(),
            analyzed_at: chrono::Utc::now(),
            analysis_duration: std::time::Duration::from_millis(1),
        }
    }

    #[test]
    fn normalizes_postgres_native_types() {
        assert_eq!(ColumnType::from_postgres("int4"), ColumnType::Integer);
        assert_eq!(ColumnType::from_postgres("jsonb"), ColumnType::Json);
        assert_eq!(ColumnType::from_postgres("made_up"), ColumnType::Unknown);
    }

    #[test]
    fn diff_detects_added_and_removed_tables() {
        let before = snapshot(vec![table("old_table", vec![])]);
        let after = snapshot(vec![table("new_table", vec![])]);

        let diff = SchemaDiscoverer::diff(&before, &after);
        assert_eq!(diff.tables_only_in_before, vec!["old_table".to_owned()]);
        assert_eq!(diff.tables_only_in_after, vec!["new_table".to_owned()]);
    }

    #[test]
    fn diff_detects_column_type_change() {
        let before = snapshot(vec![table("t", vec![col("age", ColumnType::Integer, false)])]);
        let after = snapshot(vec![table("t", vec![col("age", ColumnType::Text, false)])]);

        let diff = SchemaDiscoverer::diff(&before, &after);
        assert!(diff.changed_tables.contains_key("t"));
        assert_eq!(diff.changed_tables["t"].len(), 1);
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let snap = snapshot(vec![table("t", vec![col("id", ColumnType::Integer, false)])]);
        let diff = SchemaDiscoverer::diff(&snap, &snap);
        assert!(diff.is_empty());
    }
}
