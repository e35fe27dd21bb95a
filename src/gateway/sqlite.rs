//! SQLite query executor backed by an r2d2 connection pool.
//!
//! Statements run on the blocking thread pool; each call checks out one
//! connection for its duration.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use std::path::Path;
use thiserror::Error;

use super::{ExecutionError, QueryExecutor, RawRow, SqlValue};

/// Error type for pool construction.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to create connection pool: {0}")]
    PoolCreation(#[from] r2d2::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Pooled SQLite executor.
#[derive(Clone)]
pub struct SqliteExecutor {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteExecutor {
    /// Create a pool for the database file at `db_path`.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    /// * `max_size` - Maximum number of connections in the pool
    pub fn open<P: AsRef<Path>>(db_path: P, max_size: u32) -> Result<Self, PoolError> {
        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.execute_batch("PRAGMA busy_timeout = 5000;"));
        Self::from_manager(manager, max_size)
    }

    fn from_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self, PoolError> {
        let pool = Pool::builder().max_size(max_size).build(manager)?;
        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>, PoolError> {
        Ok(self.pool.get()?)
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }

    /// Check out a connection and run a trivial statement.
    pub fn probe(&self) -> Result<(), PoolError> {
        let conn = self.get()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

fn column_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i128::from(i)),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

fn run_query(
    conn: &rusqlite::Connection,
    sql: &str,
) -> Result<Vec<RawRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            record.push((name.clone(), column_value(row.get_ref(i)?)));
        }
        out.push(record);
    }
    Ok(out)
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn query(&self, sql: &str) -> Result<Vec<RawRow>, ExecutionError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| ExecutionError::Pool(e.to_string()))?;
            run_query(&conn, &sql).map_err(|e| ExecutionError::Database(e.to_string()))
        })
        .await
        .map_err(|e| ExecutionError::Task(e.to_string()))?
    }
}
