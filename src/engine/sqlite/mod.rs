//! `SQLite` Query Executor
//!
//! Embedded stand-in for the external relational engine. Each catalog relation
//! is a table in one `SQLite` file, with a `cloud_provider` column naming the
//! provider that owns each row.
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, opened read-only per query)
//! - Pushdown is rendered to parameterized SQL; identifiers are validated and
//!   double-quoted, values are always bound
//! - Rows are restricted to the connection's enabled providers
//! - BLOB data is Base64-encoded for JSON safety

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, Row};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Provider;
use crate::engine::{ColumnInfo, ExecutorFactory, QueryExecutor, QueryRequest, QueryResult};
use crate::error::{CloudOpsError, Result};
use crate::schema::{self, SchemaModel};

/// Column holding the owning provider of each row
pub const PROVIDER_COLUMN: &str = "cloud_provider";

const ENGINE: &str = "sqlite";

/// Opens [`SqliteExecutor`]s over one database file
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    path: PathBuf,
}

impl SqliteFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExecutorFactory for SqliteFactory {
    fn open(&self, model: &SchemaModel) -> Result<Arc<dyn QueryExecutor>> {
        // Fail at connect time rather than on the first query
        open_connection(&self.path)?;
        Ok(Arc::new(SqliteExecutor::new(&self.path, model.enabled_providers().to_vec())))
    }
}

/// Executes pushdown requests against a `SQLite` file
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    path: PathBuf,
    providers: Vec<Provider>,
}

impl SqliteExecutor {
    pub fn new(path: impl Into<PathBuf>, providers: Vec<Provider>) -> Self {
        Self { path: path.into(), providers }
    }
}

impl QueryExecutor for SqliteExecutor {
    fn engine(&self) -> &str {
        ENGINE
    }

    fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
        if !schema::is_relation(&request.table) {
            return Err(CloudOpsError::engine_error(
                ENGINE,
                format!("Unknown relation '{}'", request.table),
            ));
        }
        let conn = open_connection(&self.path)?;
        let declared = table_columns(&conn, &request.table)?;
        check_columns(request, &declared)?;

        let (sql, params) = render_sql(request, &self.providers)?;
        tracing::debug!(table = %request.table, params = params.len(), "Executing SQLite scan");
        execute_query(&conn, &sql, &params, &declared)
    }
}

/// Open `SQLite` connection read-only
fn open_connection(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| CloudOpsError::engine_error(ENGINE, format!("Failed to open SQLite database: {e}")))
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(CloudOpsError::invalid_input(format!("Invalid identifier '{name}'")))
    }
}

fn quoted(name: &str) -> Result<String> {
    Ok(format!("\"{}\"", validate_identifier(name)?))
}

/// Render a request to SQL plus bound parameters
fn render_sql(request: &QueryRequest, providers: &[Provider]) -> Result<(String, Vec<SqlValue>)> {
    let mut params = Vec::new();

    let projection = if request.projection.is_empty() {
        "*".to_string()
    } else {
        request.projection.iter().map(|c| quoted(c)).collect::<Result<Vec<_>>>()?.join(", ")
    };
    let mut sql = format!("SELECT {projection} FROM {}", quoted(&request.table.to_ascii_lowercase())?);

    if providers.is_empty() {
        sql.push_str(" WHERE 1 = 0");
    } else {
        let marks = vec!["?"; providers.len()].join(", ");
        let _ = write!(sql, " WHERE \"{PROVIDER_COLUMN}\" IN ({marks})");
        params.extend(providers.iter().map(|p| SqlValue::Text(p.as_str().to_string())));
    }

    for predicate in &request.filters {
        let column = quoted(&predicate.column)?;
        if predicate.op.is_unary() {
            let _ = write!(sql, " AND {column} {}", predicate.op.as_str());
        } else {
            let _ = write!(sql, " AND {column} {} ?", predicate.op.as_str());
            params.push(json_to_sql(&predicate.value));
        }
    }

    if !request.order_by.is_empty() {
        let keys = request
            .order_by
            .iter()
            .map(|key| -> Result<String> {
                let direction = if key.descending { "DESC" } else { "ASC" };
                Ok(format!("{} {direction}", quoted(&key.column)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let _ = write!(sql, " ORDER BY {}", keys.join(", "));
    }

    match (request.limit, request.offset) {
        (None, None) => {}
        (limit, offset) => {
            // SQLite needs a LIMIT before OFFSET; -1 means unbounded
            let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(limit));
            if let Some(offset) = offset {
                sql.push_str(" OFFSET ?");
                params.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
            }
        }
    }

    Ok((sql, params))
}

fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Declared columns of `table` via `PRAGMA table_info`
fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quoted(&table.to_ascii_lowercase())?))
        .map_err(|e| CloudOpsError::engine_error(ENGINE, format!("Failed to read table_info for {table}: {e}")))?;

    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let data_type: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            Ok(ColumnInfo::new(name, data_type, not_null == 0))
        })
        .and_then(Iterator::collect::<std::result::Result<Vec<_>, _>>)
        .map_err(|e| CloudOpsError::engine_error(ENGINE, format!("Failed to read table_info for {table}: {e}")))?;

    if columns.is_empty() {
        return Err(CloudOpsError::engine_error(ENGINE, format!("no such table: {table}")));
    }
    Ok(columns)
}

/// Every referenced column must be declared on the table
///
/// `SQLite` reads an unknown double-quoted identifier as a string literal, so
/// a misspelled column would otherwise match every row.
fn check_columns(request: &QueryRequest, declared: &[ColumnInfo]) -> Result<()> {
    let referenced = request
        .projection
        .iter()
        .chain(request.filters.iter().map(|p| &p.column))
        .chain(request.order_by.iter().map(|k| &k.column));

    for column in referenced {
        if !declared.iter().any(|c| c.name.eq_ignore_ascii_case(column)) {
            return Err(CloudOpsError::query_failed(format!("no such column: {column}")));
        }
    }
    Ok(())
}

/// Execute query and return `QueryResult`
fn execute_query(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    declared: &[ColumnInfo],
) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| CloudOpsError::query_failed(format!("Failed to prepare query: {e}")))?;

    let columns: Vec<ColumnInfo> = stmt
        .column_names()
        .iter()
        .map(|name| {
            declared
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .cloned()
                .unwrap_or_else(|| ColumnInfo::new(*name, "", true))
        })
        .collect();

    let width = columns.len();
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| row_to_json(width, row))
        .and_then(Iterator::collect::<std::result::Result<Vec<_>, _>>)
        .map_err(|e| CloudOpsError::query_failed(format!("Failed to execute query: {e}")))?;

    Ok(QueryResult::new(columns, rows))
}

/// Convert a `SQLite` row to a JSON-safe `Vec`
fn row_to_json(width: usize, row: &Row) -> std::result::Result<Vec<serde_json::Value>, rusqlite::Error> {
    (0..width).map(|idx| sqlite_value_to_json(row, idx)).collect()
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(row: &Row, idx: usize) -> std::result::Result<serde_json::Value, rusqlite::Error> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        // NaN and infinities have no JSON form
        ValueRef::Real(f) => {
            serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            })?;
            serde_json::Value::String(text.to_string())
        }
        ValueRef::Blob(b) => {
            use base64::Engine;
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CompareOp, Predicate, SortKey};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fixture(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("cloudops_sqlite_{name}_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let conn = Connection::open(&path).expect("Failed to create temp database");
        conn.execute_batch(
            "CREATE TABLE compute_resources (
                resource_id TEXT NOT NULL,
                cloud_provider TEXT NOT NULL,
                region TEXT,
                cpu_count INTEGER,
                tags BLOB
            );
            INSERT INTO compute_resources VALUES ('vm-a1', 'azure', 'westeurope', 2, NULL);
            INSERT INTO compute_resources VALUES ('vm-a2', 'azure', 'eastus', 8, X'010203');
            INSERT INTO compute_resources VALUES ('i-001', 'aws', 'us-east-1', 4, NULL);
            INSERT INTO compute_resources VALUES ('i-002', 'aws', 'eu-west-1', 16, NULL);
            INSERT INTO compute_resources VALUES ('gce-1', 'gcp', 'europe-west1', 1, NULL);",
        )
        .expect("Failed to seed fixture");
        path
    }

    fn ids(result: &QueryResult) -> Vec<String> {
        result.rows.iter().map(|row| row[0].as_str().unwrap_or_default().to_string()).collect()
    }

    #[test]
    fn test_render_sql_full_shape() {
        let request = QueryRequest::scan("compute_resources")
            .select(["resource_id", "region"])
            .filter(Predicate::new("cpu_count", CompareOp::GtEq, 4))
            .filter(Predicate::is_null("tags"))
            .order_by(SortKey::desc("cpu_count"))
            .limit(10)
            .offset(5);
        let (sql, params) = render_sql(&request, &[Provider::Azure, Provider::Aws]).unwrap();

        assert_eq!(
            sql,
            "SELECT \"resource_id\", \"region\" FROM \"compute_resources\" \
             WHERE \"cloud_provider\" IN (?, ?) AND \"cpu_count\" >= ? AND \"tags\" IS NULL \
             ORDER BY \"cpu_count\" DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text("azure".into()),
                SqlValue::Text("aws".into()),
                SqlValue::Integer(4),
                SqlValue::Integer(10),
                SqlValue::Integer(5),
            ]
        );
    }

    #[test]
    fn test_render_sql_offset_without_limit() {
        let (sql, params) = render_sql(&QueryRequest::scan("iam_resources").offset(3), &[]).unwrap();
        assert_eq!(sql, "SELECT * FROM \"iam_resources\" WHERE 1 = 0 LIMIT ? OFFSET ?");
        assert_eq!(params, vec![SqlValue::Integer(-1), SqlValue::Integer(3)]);
    }

    #[test]
    fn test_identifiers_are_validated() {
        let request = QueryRequest::scan("compute_resources").select(["id; DROP TABLE x"]);
        let err = render_sql(&request, &[Provider::Aws]).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        assert!(validate_identifier("_ok1").is_ok());
        assert!(validate_identifier("1bad").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_scan_is_restricted_to_enabled_providers() {
        let path = fixture("restrict");
        let executor = SqliteExecutor::new(&path, vec![Provider::Aws]);

        let result = executor
            .execute(&QueryRequest::scan("compute_resources").order_by(SortKey::asc("resource_id")))
            .unwrap();
        assert_eq!(ids(&result), vec!["i-001", "i-002"]);

        let none = SqliteExecutor::new(&path, Vec::new());
        assert_eq!(none.execute(&QueryRequest::scan("compute_resources")).unwrap().row_count(), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_pushdown_filters_sort_and_paginate() {
        let path = fixture("pushdown");
        let executor = SqliteExecutor::new(&path, Provider::ALL.to_vec());

        let request = QueryRequest::scan("compute_resources")
            .select(["resource_id", "cpu_count"])
            .filter(Predicate::parse("cpu_count>=2").unwrap())
            .order_by(SortKey::desc("cpu_count"))
            .limit(2)
            .offset(1);
        let result = executor.execute(&request).unwrap();

        assert_eq!(result.column_names(), vec!["resource_id", "cpu_count"]);
        assert_eq!(result.rows, vec![vec![json!("vm-a2"), json!(8)], vec![json!("i-001"), json!(4)]]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_column_metadata_and_blob_encoding() {
        let path = fixture("types");
        let executor = SqliteExecutor::new(&path, vec![Provider::Azure]);

        let result = executor
            .execute(&QueryRequest::scan("compute_resources").filter(Predicate::eq("resource_id", "vm-a2")))
            .unwrap();

        assert_eq!(result.columns[0], ColumnInfo::new("resource_id", "TEXT", false));
        assert_eq!(result.columns[3], ColumnInfo::new("cpu_count", "INTEGER", true));
        assert_eq!(result.rows[0][4], json!("AQID"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_engine_errors_pass_through() {
        let path = fixture("errors");
        let executor = SqliteExecutor::new(&path, vec![Provider::Gcp]);

        let err = executor.execute(&QueryRequest::scan("storage_resources")).unwrap_err();
        assert_eq!(err.error_code(), "ENGINE_ERROR");
        assert!(err.message().contains("no such table"));

        let err = executor.execute(&QueryRequest::scan("billing")).unwrap_err();
        assert!(err.message().contains("Unknown relation"));

        let err = executor
            .execute(&QueryRequest::scan("compute_resources").select(["missing_column"]))
            .unwrap_err();
        assert_eq!(err.error_code(), "QUERY_FAILED");
        assert!(err.message().contains("no such column: missing_column"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_filter_and_sort_columns_fail() {
        let path = fixture("columns");
        let executor = SqliteExecutor::new(&path, vec![Provider::Aws]);

        let err = executor
            .execute(&QueryRequest::scan("compute_resources").filter(Predicate::eq("regoin", "regoin")))
            .unwrap_err();
        assert_eq!(err.error_code(), "QUERY_FAILED");
        assert!(err.message().contains("no such column: regoin"));

        let err = executor
            .execute(&QueryRequest::scan("compute_resources").order_by(SortKey::desc("cpu_cuont")))
            .unwrap_err();
        assert_eq!(err.error_code(), "QUERY_FAILED");
        assert!(err.message().contains("no such column: cpu_cuont"));

        let result = executor
            .execute(&QueryRequest::scan("compute_resources").filter(Predicate::eq("REGION", "us-east-1")))
            .unwrap();
        assert_eq!(ids(&result), vec!["i-001"]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_factory_rejects_missing_file() {
        let factory = SqliteFactory::new("/nonexistent/cloudops/inventory.db");
        let config = crate::config::resolve(
            &crate::config::parse(""),
            &crate::config::RawParams::new(),
            &crate::config::MapEnv::new(),
            crate::config::ResolveOptions::default(),
        )
        .unwrap();
        let Err(err) = factory.open(&SchemaModel::build(&config)) else {
            panic!("opening a missing database should fail");
        };
        assert_eq!(err.error_code(), "ENGINE_ERROR");
    }
}
