//! Query Engine Capability and Core Types
//!
//! The core never talks to a SQL engine or a cloud API directly. It depends on
//! [`QueryExecutor`], a narrow capability implemented by an adapter around the
//! external relational engine, and on [`ExecutorFactory`], which opens one executor
//! per connection from the connection's [`SchemaModel`].
//!
//! A [`QueryRequest`] carries the pushdown shape of a scan: relation, projection,
//! filter, sort, and pagination. The cache keys on that shape, so two requests that
//! differ in any of them never share a result.
//!
//! # Errors
//! Errors from executors (missing tables, bad columns, adapter auth failures) are
//! delegated: the core returns them to the caller unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{CloudOpsError, Result};
use crate::schema::SchemaModel;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Comparison operators available for filter pushdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    IsNull,
    IsNotNull,
}

impl CompareOp {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Operators that take no operand
    #[must_use]
    pub const fn is_unary(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

/// One filter term; a request's filters are combined with AND
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<serde_json::Value>) -> Self {
        Self { column: column.into(), op, value: value.into() }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::new(column, CompareOp::Eq, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::new(column, CompareOp::IsNull, serde_json::Value::Null)
    }

    /// Parse `column<op>value`, e.g. `cloud_provider=aws` or `cpu_count>=4`
    ///
    /// `~` stands for LIKE. Values that parse as integers, floats, or booleans are
    /// typed accordingly; everything else is a string.
    pub fn parse(expr: &str) -> Result<Self> {
        const OPERATORS: [(&str, CompareOp); 7] = [
            ("!=", CompareOp::NotEq),
            (">=", CompareOp::GtEq),
            ("<=", CompareOp::LtEq),
            ("=", CompareOp::Eq),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
            ("~", CompareOp::Like),
        ];

        let (pos, token, op) = OPERATORS
            .iter()
            .filter_map(|(token, op)| expr.find(token).map(|pos| (pos, *token, *op)))
            .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
            .ok_or_else(|| CloudOpsError::invalid_input(format!("Filter '{expr}' has no operator")))?;

        let column = expr[..pos].trim();
        if column.is_empty() {
            return Err(CloudOpsError::invalid_input(format!("Filter '{expr}' has no column")));
        }
        let raw = expr[pos + token.len()..].trim();

        Ok(Self::new(column, op, typed_value(raw)))
    }

    /// Canonical text form, stable across runs
    #[must_use]
    pub fn signature(&self) -> String {
        if self.op.is_unary() {
            format!("{} {}", self.column, self.op.as_str())
        } else {
            format!("{} {} {}", self.column, self.op.as_str(), self.value)
        }
    }
}

fn typed_value(raw: &str) -> serde_json::Value {
    if let Ok(i) = raw.parse::<i64>() {
        return i.into();
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    match raw {
        "true" => true.into(),
        "false" => false.into(),
        _ => raw.into(),
    }
}

/// Sort term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), descending: false }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), descending: true }
    }

    /// Parse `column`, `column:asc`, or `column:desc`
    pub fn parse(expr: &str) -> Result<Self> {
        let (column, direction) = match expr.split_once(':') {
            Some((column, direction)) => (column.trim(), Some(direction.trim())),
            None => (expr.trim(), None),
        };
        if column.is_empty() {
            return Err(CloudOpsError::invalid_input(format!("Sort '{expr}' has no column")));
        }
        match direction {
            None => Ok(Self::asc(column)),
            Some(d) if d.eq_ignore_ascii_case("asc") => Ok(Self::asc(column)),
            Some(d) if d.eq_ignore_ascii_case("desc") => Ok(Self::desc(column)),
            Some(d) => Err(CloudOpsError::invalid_input(format!(
                "Sort direction '{d}' must be 'asc' or 'desc'"
            ))),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, if self.descending { "DESC" } else { "ASC" })
    }
}

/// A scan with its pushdown shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Relation name, e.g. `compute_resources`
    pub table: String,

    /// Requested columns; empty means all columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projection: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Predicate>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<SortKey>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl QueryRequest {
    /// Full scan of `table`
    pub fn scan(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    #[must_use]
    pub fn order_by(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Column metadata in a result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,

    /// Engine-reported type name
    pub data_type: String,

    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self { name: name.into(), data_type: data_type.into(), nullable }
    }
}

/// Materialized query result
///
/// Rows are positional and follow `columns`. Results are immutable once produced;
/// the cache shares them behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    #[must_use]
    pub const fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Executes scans against the external engine
///
/// Implementations may block for as long as the remote fetch takes. They must be
/// shareable across caller threads.
pub trait QueryExecutor: Send + Sync {
    /// Engine name used in error reports and logs
    fn engine(&self) -> &str;

    /// Run one scan
    fn execute(&self, request: &QueryRequest) -> Result<QueryResult>;
}

/// Opens an executor for a connection's schema model
pub trait ExecutorFactory: Send + Sync {
    fn open(&self, model: &SchemaModel) -> Result<Arc<dyn QueryExecutor>>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(&SchemaModel) -> Result<Arc<dyn QueryExecutor>> + Send + Sync,
{
    fn open(&self, model: &SchemaModel) -> Result<Arc<dyn QueryExecutor>> {
        self(model)
    }
}
