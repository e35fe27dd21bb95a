//! Execution gateway.
//!
//! Runs rendered SQL through a [`QueryExecutor`] and normalizes every
//! column of every row into JSON. Integers within the safe-integer range
//! become numbers; anything larger in magnitude becomes its exact decimal
//! string. Results are never cached.

pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::observability::metrics::record_query;

/// Largest integer magnitude a JSON number (IEEE-754 double) carries exactly.
pub const MAX_SAFE_INTEGER: i128 = 9_007_199_254_740_991;

/// Error type for query execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("query task failed: {0}")]
    Task(String),
}

/// A column value as produced by a driver, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i128),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// One driver row: column names paired with values, in select order.
pub type RawRow = Vec<(String, SqlValue)>;

/// A normalized result row.
pub type Row = Map<String, Value>;

/// Executes SQL text against a data store.
///
/// Connection checkout, pooling limits and concurrency are the
/// implementor's concern.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<RawRow>, ExecutionError>;
}

/// Encode an integer without losing precision.
pub fn normalize_integer(value: i128) -> Value {
    if value.abs() <= MAX_SAFE_INTEGER {
        // in range for i64 by construction
        Value::Number(Number::from(value as i64))
    } else {
        Value::String(value.to_string())
    }
}

/// Normalize a single column value.
pub fn normalize_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => normalize_integer(i),
        SqlValue::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
    }
}

/// Normalize a driver row, keeping column order.
pub fn normalize_row(row: RawRow) -> Row {
    row.into_iter()
        .map(|(name, value)| (name, normalize_value(value)))
        .collect()
}

/// Where a query came from, for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Endpoint,
    Schedule,
}

impl QuerySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Endpoint => "endpoint",
            Self::Schedule => "schedule",
        }
    }
}

/// Shared entry point for executing rendered SQL.
#[derive(Clone)]
pub struct ExecutionGateway {
    executor: Arc<dyn QueryExecutor>,
}

impl ExecutionGateway {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Execute `sql` and return normalized rows.
    #[tracing::instrument(skip(self, sql, source), fields(source = source.as_str()))]
    pub async fn execute(&self, sql: &str, source: QuerySource) -> Result<Vec<Row>, ExecutionError> {
        tracing::debug!(sql, "RUN SQL");
        let start = Instant::now();

        let result = self.executor.query(sql).await;
        let latency = start.elapsed().as_secs_f64();
        record_query(source.as_str(), result.is_ok(), latency);

        let rows = result?;
        tracing::debug!(rows = rows.len(), latency_ms = latency * 1000.0, "Query complete");
        Ok(rows.into_iter().map(normalize_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryExecutor for FixedExecutor {
        async fn query(&self, _sql: &str) -> Result<Vec<RawRow>, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![vec![
                ("big".to_string(), SqlValue::Integer(9_223_372_036_854_775_807)),
                ("small".to_string(), SqlValue::Integer(42)),
                ("name".to_string(), SqlValue::Text("x".into())),
            ]])
        }
    }

    #[test]
    fn test_integers_at_and_beyond_safe_bound() {
        assert_eq!(normalize_integer(42), json!(42));
        assert_eq!(normalize_integer(MAX_SAFE_INTEGER), json!(9_007_199_254_740_991_i64));
        assert_eq!(
            normalize_integer(MAX_SAFE_INTEGER + 1),
            json!("9007199254740992")
        );
        assert_eq!(
            normalize_integer(9_223_372_036_854_775_807),
            json!("9223372036854775807")
        );
        assert_eq!(
            normalize_integer(-MAX_SAFE_INTEGER - 1),
            json!("-9007199254740992")
        );
        assert_eq!(
            normalize_integer(u64::MAX as i128),
            json!("18446744073709551615")
        );
    }

    #[test]
    fn test_other_values() {
        assert_eq!(normalize_value(SqlValue::Null), Value::Null);
        assert_eq!(normalize_value(SqlValue::Real(1.5)), json!(1.5));
        assert_eq!(normalize_value(SqlValue::Real(f64::NAN)), Value::Null);
        assert_eq!(normalize_value(SqlValue::Blob(vec![1, 2])), json!([1, 2]));
    }

    #[test]
    fn test_row_keeps_column_order() {
        let row = normalize_row(vec![
            ("z".into(), SqlValue::Integer(1)),
            ("a".into(), SqlValue::Integer(2)),
        ]);
        let keys: Vec<&String> = row.keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[tokio::test]
    async fn test_execute_normalizes_and_never_caches() {
        let executor = Arc::new(FixedExecutor {
            calls: AtomicUsize::new(0),
        });
        let gateway = ExecutionGateway::new(executor.clone());

        let rows = gateway.execute("SELECT 1", QuerySource::Endpoint).await.unwrap();
        gateway.execute("SELECT 1", QuerySource::Endpoint).await.unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(rows[0]["big"], json!("9223372036854775807"));
        assert_eq!(rows[0]["small"], json!(42));
        assert_eq!(rows[0]["name"], json!("x"));
    }
}
