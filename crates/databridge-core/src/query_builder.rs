//! Query Builder (C7) — a fluent, immutable-on-build composer spanning both
//! SQL dialects and the document-store pipeline (spec §4.7).
//!
//! `build()` never mutates the builder: calling it twice on the same state
//! yields equal output, and `reset()` returns a builder to its initial
//! empty state, matching the "purity laws" design note (spec §4.7, §9
//! Testable Properties).

use serde::{Deserialize, Serialize};

use crate::error::QueryBuilderError;

/// The SQL dialect a [`QueryBuilder`] renders for (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlDialect {
    Postgres,
    MySql,
}

/// A single comparison operator, mapped per-dialect at render time (spec
/// §4.7 "operator mapping").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    ILike,
    In,
    NotIn,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// The bound values a condition's single `value` field expands to for
    /// this operator — most operators take exactly one, `Between`/
    /// `NotBetween` take a two-element array (the bounds), and `In`/`NotIn`
    /// take a non-empty array (the candidate list).
    fn bind_values(self, value: &Option<serde_json::Value>) -> Result<Vec<serde_json::Value>, QueryBuilderError> {
        match self {
            Self::IsNull | Self::IsNotNull => Ok(Vec::new()),
            Self::Between | Self::NotBetween => value
                .as_ref()
                .and_then(serde_json::Value::as_array)
                .filter(|bounds| bounds.len() == 2)
                .cloned()
                .ok_or_else(|| QueryBuilderError::InvalidConditionValue {
                    reason: "between/not between requires a two-element array value".to_owned(),
                }),
            Self::In | Self::NotIn => value
                .as_ref()
                .and_then(serde_json::Value::as_array)
                .filter(|list| !list.is_empty())
                .cloned()
                .ok_or_else(|| QueryBuilderError::InvalidConditionValue {
                    reason: "in/not in requires a non-empty array value".to_owned(),
                }),
            _ => value.clone().map(|v| vec![v]).ok_or_else(|| QueryBuilderError::InvalidConditionValue {
                reason: "operator requires a value".to_owned(),
            }),
        }
    }

    /// Render this operator's SQL fragment. `placeholders` must already
    /// have the arity [`Self::bind_values`] produced for the same value —
    /// one for most operators, two for between, N for in/not-in.
    fn render(self, dialect: SqlDialect, column: &str, placeholders: &[String]) -> Result<String, QueryBuilderError> {
        let op_sql = match self {
            Self::Eq => format!("{column} = {}", placeholders[0]),
            Self::NotEq => format!("{column} != {}", placeholders[0]),
            Self::Lt => format!("{column} < {}", placeholders[0]),
            Self::Lte => format!("{column} <= {}", placeholders[0]),
            Self::Gt => format!("{column} > {}", placeholders[0]),
            Self::Gte => format!("{column} >= {}", placeholders[0]),
            Self::Like => format!("{column} LIKE {}", placeholders[0]),
            Self::ILike => match dialect {
                // Postgres has native ILIKE; MySQL has none, so fall back to
                // a case-folded LIKE (spec §4.7 "ilike fallback").
                SqlDialect::Postgres => format!("{column} ILIKE {}", placeholders[0]),
                SqlDialect::MySql => format!("LOWER({column}) LIKE LOWER({})", placeholders[0]),
            },
            Self::In => format!("{column} IN ({})", placeholders.join(", ")),
            Self::NotIn => format!("{column} NOT IN ({})", placeholders.join(", ")),
            Self::Between => format!("{column} BETWEEN {} AND {}", placeholders[0], placeholders[1]),
            Self::NotBetween => format!("{column} NOT BETWEEN {} AND {}", placeholders[0], placeholders[1]),
            Self::IsNull => format!("{column} IS NULL"),
            Self::IsNotNull => format!("{column} IS NOT NULL"),
        };
        Ok(op_sql)
    }
}

#[derive(Debug, Clone)]
struct Condition {
    column: String,
    operator: Operator,
    value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
struct OrderBy {
    column: String,
    direction: SortDirection,
}

/// An explicit join clause (spec §4.7 feature table "join").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    on: String,
}

/// The statement shape a [`QueryBuilder`] renders (spec §4.7 feature table
/// "insert/update/delete").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Statement {
    Select,
    Insert,
    Update,
    Delete,
}

fn valid_identifier(name: &str) -> Result<(), QueryBuilderError> {
    if name.is_empty() || name.contains(['"', '\'', ';']) {
        return Err(QueryBuilderError::InvalidIdentifier {
            reason: format!("'{name}' is empty or contains a disallowed character"),
        });
    }
    Ok(())
}

/// Dialect-scoped identifier quoting (spec §4.7 "Identifier quoting… are
/// dialect-scoped"), exposed for callers assembling raw identifiers (e.g.
/// dynamic column lists) outside the builder's own validated fields.
#[must_use]
pub fn quote_identifier(dialect: SqlDialect, name: &str) -> String {
    match dialect {
        SqlDialect::Postgres => format!("\"{name}\""),
        SqlDialect::MySql => format!("`{name}`"),
    }
}

/// The rendered output of a [`QueryBuilder::build`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
}

/// A fluent SQL query composer (spec §4.7). Each `.where_*`/`.order_by`/
/// `.paginate` call returns `&mut Self` for chaining; the accumulated state
/// is only read (never mutated) by [`Self::build`].
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    dialect: SqlDialect,
    statement: Statement,
    table: Option<String>,
    alias: Option<String>,
    columns: Vec<String>,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
    group_by: Vec<String>,
    having: Vec<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    insert_columns: Vec<String>,
    insert_rows: Vec<Vec<serde_json::Value>>,
    assignments: Vec<(String, serde_json::Value)>,
}

impl QueryBuilder {
    #[must_use]
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            statement: Statement::Select,
            table: None,
            alias: None,
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            insert_columns: Vec::new(),
            insert_rows: Vec::new(),
            assignments: Vec::new(),
        }
    }

    /// Reset the builder to its initial, empty state (spec §9 "reset
    /// returns to build-time-equivalent-to-new").
    pub fn reset(&mut self) -> &mut Self {
        *self = Self::new(self.dialect);
        self
    }

    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `table` is empty
    /// or contains a quote/semicolon.
    pub fn table(&mut self, table: impl Into<String>) -> Result<&mut Self, QueryBuilderError> {
        let table = table.into();
        valid_identifier(&table)?;
        self.table = Some(table);
        Ok(self)
    }

    /// `from(table, alias)` — table plus an optional alias (spec §4.7 feature
    /// table "from: table + optional alias").
    ///
    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `table` or `alias`
    /// fail validation.
    pub fn from(&mut self, table: impl Into<String>, alias: Option<&str>) -> Result<&mut Self, QueryBuilderError> {
        self.table(table)?;
        if let Some(alias) = alias {
            valid_identifier(alias)?;
            self.alias = Some(alias.to_owned());
        }
        Ok(self)
    }

    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `column` is empty
    /// or contains a quote/semicolon.
    pub fn select(&mut self, column: impl Into<String>) -> Result<&mut Self, QueryBuilderError> {
        let column = column.into();
        valid_identifier(&column)?;
        self.columns.push(column);
        Ok(self)
    }

    /// Explicit join clause (spec §4.7 feature table "join").
    ///
    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `table` fails
    /// validation.
    pub fn join(&mut self, kind: JoinKind, table: impl Into<String>, on: impl Into<String>) -> Result<&mut Self, QueryBuilderError> {
        let table = table.into();
        valid_identifier(&table)?;
        self.joins.push(Join {
            kind,
            table,
            on: on.into(),
        });
        Ok(self)
    }

    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `column` is empty
    /// or contains a quote/semicolon.
    pub fn filter(
        &mut self,
        column: impl Into<String>,
        operator: Operator,
        value: Option<serde_json::Value>,
    ) -> Result<&mut Self, QueryBuilderError> {
        let column = column.into();
        valid_identifier(&column)?;
        self.conditions.push(Condition {
            column,
            operator,
            value,
        });
        Ok(self)
    }

    /// Group-by column (spec §4.7 feature table "group/having").
    ///
    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `column` fails
    /// validation.
    pub fn group_by(&mut self, column: impl Into<String>) -> Result<&mut Self, QueryBuilderError> {
        let column = column.into();
        valid_identifier(&column)?;
        self.group_by.push(column);
        Ok(self)
    }

    /// Having-clause condition, evaluated after grouping (spec §4.7 feature
    /// table "group/having").
    ///
    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `column` fails
    /// validation.
    pub fn having(
        &mut self,
        column: impl Into<String>,
        operator: Operator,
        value: Option<serde_json::Value>,
    ) -> Result<&mut Self, QueryBuilderError> {
        let column = column.into();
        valid_identifier(&column)?;
        self.having.push(Condition {
            column,
            operator,
            value,
        });
        Ok(self)
    }

    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `column` is empty
    /// or contains a quote/semicolon.
    pub fn order_by(&mut self, column: impl Into<String>, ascending: bool) -> Result<&mut Self, QueryBuilderError> {
        let column = column.into();
        valid_identifier(&column)?;
        self.order_by.push(OrderBy {
            column,
            direction: if ascending { SortDirection::Asc } else { SortDirection::Desc },
        });
        Ok(self)
    }

    pub fn limit_offset(&mut self, limit: u64, offset: u64) -> &mut Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Page-based convenience over [`Self::limit_offset`]: `offset = (page
    /// - 1) * per_page` (spec §4.3 "Pagination is a convenience for
    /// `limit + offset = (page-1)*per_page`"). `page` is 1-indexed; page 0
    /// is treated as page 1.
    pub fn paginate(&mut self, page: u64, per_page: u64) -> &mut Self {
        let page = page.max(1);
        self.limit_offset(per_page, (page - 1) * per_page)
    }

    /// Switch this builder to render an `INSERT` for `columns`/`rows` (spec
    /// §4.7 feature table "insert/update/delete" — SQL DML clauses).
    ///
    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if any column fails
    /// validation, or [`QueryBuilderError::Incomplete`] if a row's arity
    /// doesn't match `columns`.
    pub fn insert_into(
        &mut self,
        table: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    ) -> Result<&mut Self, QueryBuilderError> {
        self.table(table)?;
        for column in &columns {
            valid_identifier(column)?;
        }
        for row in &rows {
            if row.len() != columns.len() {
                return Err(QueryBuilderError::Incomplete {
                    reason: "row arity does not match column count".to_owned(),
                });
            }
        }
        self.statement = Statement::Insert;
        self.insert_columns = columns;
        self.insert_rows = rows;
        Ok(self)
    }

    /// Switch this builder to render an `UPDATE` against `table`, combined
    /// with whatever `.filter` conditions have been (or will be) set.
    ///
    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `table` or any
    /// assigned column fails validation.
    pub fn update(&mut self, table: impl Into<String>, assignments: Vec<(String, serde_json::Value)>) -> Result<&mut Self, QueryBuilderError> {
        self.table(table)?;
        for (column, _) in &assignments {
            valid_identifier(column)?;
        }
        self.statement = Statement::Update;
        self.assignments = assignments;
        Ok(self)
    }

    /// Switch this builder to render a `DELETE FROM table`, combined with
    /// whatever `.filter` conditions have been (or will be) set.
    ///
    /// # Errors
    /// Returns [`QueryBuilderError::InvalidIdentifier`] if `table` fails
    /// validation.
    pub fn delete_from(&mut self, table: impl Into<String>) -> Result<&mut Self, QueryBuilderError> {
        self.table(table)?;
        self.statement = Statement::Delete;
        Ok(self)
    }

    fn render_where(&self, conditions: &[Condition], params: &mut Vec<serde_json::Value>) -> Result<Option<String>, QueryBuilderError> {
        if conditions.is_empty() {
            return Ok(None);
        }
        let mut clauses = Vec::with_capacity(conditions.len());
        for cond in conditions {
            let values = cond.operator.bind_values(&cond.value)?;
            let placeholders: Vec<String> = values
                .into_iter()
                .map(|value| {
                    params.push(value);
                    self.placeholder(params.len(), 0)
                })
                .collect();
            clauses.push(cond.operator.render(self.dialect, &cond.column, &placeholders)?);
        }
        Ok(Some(clauses.join(" AND ")))
    }

    fn build_insert(&self) -> Result<BuiltQuery, QueryBuilderError> {
        let table = self.table.as_ref().ok_or_else(|| QueryBuilderError::Incomplete {
            reason: "no table set".to_owned(),
        })?;
        if self.insert_columns.is_empty() {
            return Err(QueryBuilderError::Incomplete {
                reason: "insert requires at least one column".to_owned(),
            });
        }

        let mut params = Vec::new();
        let mut row_groups = Vec::with_capacity(self.insert_rows.len());
        for row in &self.insert_rows {
            let placeholders: Vec<String> = row
                .iter()
                .map(|value| {
                    params.push(value.clone());
                    self.placeholder(params.len(), 0)
                })
                .collect();
            row_groups.push(format!("({})", placeholders.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {table} ({}) VALUES {}",
            self.insert_columns.join(", "),
            row_groups.join(", ")
        );
        Ok(BuiltQuery { sql, params })
    }

    fn build_update(&self) -> Result<BuiltQuery, QueryBuilderError> {
        let table = self.table.as_ref().ok_or_else(|| QueryBuilderError::Incomplete {
            reason: "no table set".to_owned(),
        })?;
        if self.assignments.is_empty() {
            return Err(QueryBuilderError::Incomplete {
                reason: "update requires at least one assignment".to_owned(),
            });
        }

        let mut params = Vec::new();
        let sets: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!("{column} = {}", self.placeholder(params.len(), 0))
            })
            .collect();

        let mut sql = format!("UPDATE {table} SET {}", sets.join(", "));
        if let Some(clause) = self.render_where(&self.conditions, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok(BuiltQuery { sql, params })
    }

    fn build_delete(&self) -> Result<BuiltQuery, QueryBuilderError> {
        let table = self.table.as_ref().ok_or_else(|| QueryBuilderError::Incomplete {
            reason: "no table set".to_owned(),
        })?;

        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {table}");
        if let Some(clause) = self.render_where(&self.conditions, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok(BuiltQuery { sql, params })
    }

    /// Render the accumulated state into SQL text and a positional
    /// parameter list. Does not mutate `self` — calling `build()` twice in
    /// a row yields identical output.
    ///
    /// # Errors
    ///
    /// Returns [`QueryBuilderError::Incomplete`] if no table was set, or the
    /// active statement's own required fields are missing.
    pub fn build(&self) -> Result<BuiltQuery, QueryBuilderError> {
        match self.statement {
            Statement::Insert => return self.build_insert(),
            Statement::Update => return self.build_update(),
            Statement::Delete => return self.build_delete(),
            Statement::Select => {}
        }

        let table = self.table.as_ref().ok_or_else(|| QueryBuilderError::Incomplete {
            reason: "no table set".to_owned(),
        })?;

        let columns = if self.columns.is_empty() {
            "*".to_owned()
        } else {
            self.columns.join(", ")
        };

        let mut sql = format!("SELECT {columns} FROM {table}");
        if let Some(alias) = &self.alias {
            sql.push_str(&format!(" AS {alias}"));
        }
        for join in &self.joins {
            let kind = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT JOIN",
                JoinKind::Right => "RIGHT JOIN",
            };
            sql.push_str(&format!(" {kind} {} ON {}", join.table, join.on));
        }
        let mut params = Vec::new();

        if let Some(clause) = self.render_where(&self.conditions, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if let Some(clause) = self.render_where(&self.having, &mut params)? {
            sql.push_str(" HAVING ");
            sql.push_str(&clause);
        }

        if !self.order_by.is_empty() {
            let parts: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {dir}", o.column)
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&parts.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        Ok(BuiltQuery { sql, params })
    }

    fn placeholder(&self, position: usize, index: usize) -> String {
        match self.dialect {
            SqlDialect::Postgres => format!("${position}"),
            SqlDialect::MySql => {
                let _ = index;
                "?".to_owned()
            }
        }
    }
}

/// The document-store counterpart to SQL conditions (spec §4.7 "document
/// pipeline builder"), also the discriminant [`crate::connector::OpKind`]
/// classifies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DocumentOp {
    Find {
        collection: String,
        filter: serde_json::Value,
        sort: Option<serde_json::Value>,
        limit: Option<i64>,
        skip: Option<i64>,
    },
    Aggregate {
        collection: String,
        pipeline: Vec<serde_json::Value>,
    },
    InsertMany {
        collection: String,
        documents: Vec<serde_json::Value>,
    },
    UpdateMany {
        collection: String,
        filter: serde_json::Value,
        update: serde_json::Value,
    },
    DeleteMany {
        collection: String,
        filter: serde_json::Value,
    },
    CreateCollection {
        collection: String,
    },
    DropCollection {
        collection: String,
    },
}

/// A fluent composer for [`DocumentOp`]s, mirroring [`QueryBuilder`]'s
/// purity laws.
#[derive(Debug, Clone, Default)]
pub struct DocumentQueryBuilder {
    collection: Option<String>,
    filter: serde_json::Value,
    sort: Option<serde_json::Value>,
    limit: Option<i64>,
    skip: Option<i64>,
}

impl DocumentQueryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collection: None,
            filter: serde_json::Value::Object(serde_json::Map::new()),
            sort: None,
            limit: None,
            skip: None,
        }
    }

    pub fn reset(&mut self) -> &mut Self {
        *self = Self::new();
        self
    }

    pub fn collection(&mut self, name: impl Into<String>) -> &mut Self {
        self.collection = Some(name.into());
        self
    }

    pub fn filter(&mut self, filter: serde_json::Value) -> &mut Self {
        self.filter = filter;
        self
    }

    pub fn sort(&mut self, sort: serde_json::Value) -> &mut Self {
        self.sort = Some(sort);
        self
    }

    pub fn paginate(&mut self, limit: i64, skip: i64) -> &mut Self {
        self.limit = Some(limit);
        self.skip = Some(skip);
        self
    }

    /// # Errors
    /// Returns [`QueryBuilderError::Incomplete`] if no collection was set.
    pub fn build_find(&self) -> Result<DocumentOp, QueryBuilderError> {
        let collection = self.collection.clone().ok_or_else(|| QueryBuilderError::Incomplete {
            reason: "no collection set".to_owned(),
        })?;
        Ok(DocumentOp::Find {
            collection,
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
            skip: self.skip,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn renders_select_with_postgres_placeholders() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("users").unwrap();
        qb.filter("age", Operator::Gte, Some(serde_json::json!(18))).unwrap();
        qb.order_by("created_at", false).unwrap();
        qb.limit_offset(10, 0);

        let built = qb.build().unwrap();
        assert_eq!(
            built.sql,
            "SELECT * FROM users WHERE age >= $1 ORDER BY created_at DESC LIMIT 10 OFFSET 0"
        );
        assert_eq!(built.params, vec![serde_json::json!(18)]);
    }

    #[test]
    fn paginate_converts_page_and_per_page_into_limit_offset() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("users").unwrap();
        qb.paginate(3, 20);
        let built = qb.build().unwrap();
        assert!(built.sql.ends_with("LIMIT 20 OFFSET 40"));
    }

    #[test]
    fn renders_join_clause() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("orders").unwrap();
        qb.join(JoinKind::Left, "customers", "orders.customer_id = customers.id").unwrap();
        let built = qb.build().unwrap();
        assert_eq!(
            built.sql,
            "SELECT * FROM orders LEFT JOIN customers ON orders.customer_id = customers.id"
        );
    }

    #[test]
    fn renders_group_by_and_having() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("orders").unwrap();
        qb.select("customer_id").unwrap();
        qb.group_by("customer_id").unwrap();
        qb.having("customer_id", Operator::Gt, Some(serde_json::json!(0))).unwrap();
        let built = qb.build().unwrap();
        assert!(built.sql.contains("GROUP BY customer_id"));
        assert!(built.sql.contains("HAVING customer_id > $1"));
    }

    #[test]
    fn renders_insert_with_multiple_rows() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.insert_into(
            "users",
            vec!["id".to_owned(), "name".to_owned()],
            vec![
                vec![serde_json::json!(1), serde_json::json!("a")],
                vec![serde_json::json!(2), serde_json::json!("b")],
            ],
        )
        .unwrap();
        let built = qb.build().unwrap();
        assert_eq!(built.sql, "INSERT INTO users (id, name) VALUES ($1, $2), ($3, $4)");
        assert_eq!(built.params.len(), 4);
    }

    #[test]
    fn renders_update_with_where() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.update("users", vec![("name".to_owned(), serde_json::json!("bob"))]).unwrap();
        qb.filter("id", Operator::Eq, Some(serde_json::json!(1))).unwrap();
        let built = qb.build().unwrap();
        assert_eq!(built.sql, "UPDATE users SET name = $1 WHERE id = $2");
        assert_eq!(built.params, vec![serde_json::json!("bob"), serde_json::json!(1)]);
    }

    #[test]
    fn renders_delete_with_where() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.delete_from("users").unwrap();
        qb.filter("id", Operator::Eq, Some(serde_json::json!(1))).unwrap();
        let built = qb.build().unwrap();
        assert_eq!(built.sql, "DELETE FROM users WHERE id = $1");
    }

    #[test]
    fn quotes_identifiers_per_dialect() {
        assert_eq!(quote_identifier(SqlDialect::Postgres, "user"), "\"user\"");
        assert_eq!(quote_identifier(SqlDialect::MySql, "user"), "`user`");
    }

    #[test]
    fn renders_between_with_two_bound_placeholders() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("orders").unwrap();
        qb.filter("total", Operator::Between, Some(serde_json::json!([10, 100]))).unwrap();
        let built = qb.build().unwrap();
        assert_eq!(built.sql, "SELECT * FROM orders WHERE total BETWEEN $1 AND $2");
        assert_eq!(built.params, vec![serde_json::json!(10), serde_json::json!(100)]);
    }

    #[test]
    fn renders_in_with_expanded_value_list() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("orders").unwrap();
        qb.filter("status", Operator::In, Some(serde_json::json!(["open", "pending", "shipped"])))
            .unwrap();
        let built = qb.build().unwrap();
        assert_eq!(built.sql, "SELECT * FROM orders WHERE status IN ($1, $2, $3)");
        assert_eq!(
            built.params,
            vec![serde_json::json!("open"), serde_json::json!("pending"), serde_json::json!("shipped")]
        );
    }

    #[test]
    fn between_rejects_a_non_pair_value() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("orders").unwrap();
        qb.filter("total", Operator::Between, Some(serde_json::json!([10]))).unwrap();
        let err = qb.build().unwrap_err();
        assert!(matches!(err, QueryBuilderError::InvalidConditionValue { .. }));
    }

    #[test]
    fn in_rejects_an_empty_list() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("orders").unwrap();
        qb.filter("status", Operator::In, Some(serde_json::json!([]))).unwrap();
        let err = qb.build().unwrap_err();
        assert!(matches!(err, QueryBuilderError::InvalidConditionValue { .. }));
    }

    #[test]
    fn mysql_ilike_falls_back_to_lower_like() {
        let mut qb = QueryBuilder::new(SqlDialect::MySql);
        qb.table("users").unwrap();
        qb.filter("name", Operator::ILike, Some(serde_json::json!("%a%"))).unwrap();

        let built = qb.build().unwrap();
        assert!(built.sql.contains("LOWER(name) LIKE LOWER(?)"));
    }

    #[test]
    fn build_is_pure_and_repeatable() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("t").unwrap();
        let a = qb.build().unwrap();
        let b = qb.build().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        qb.table("t").unwrap();
        qb.filter("x", Operator::Eq, Some(serde_json::json!(1))).unwrap();
        qb.reset();
        assert!(qb.build().is_err());
    }

    #[test]
    fn rejects_invalid_identifier() {
        let mut qb = QueryBuilder::new(SqlDialect::Postgres);
        let err = qb.table("bad\"table").unwrap_err();
        assert!(matches!(err, QueryBuilderError::InvalidIdentifier { .. }));
    }

    #[test]
    fn document_builder_requires_collection() {
        let qb = DocumentQueryBuilder::new();
        assert!(qb.build_find().is_err());
    }
}
