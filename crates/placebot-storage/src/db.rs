//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex. Each chat session owns one
//! `Database`; nothing here is shared across sessions. Blocking work runs on
//! the tokio blocking pool and is bounded by the configured query timeout,
//! after which the running statement is interrupted.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use tracing::{debug, info, warn};

use placebot_core::config::DatabaseConfig;
use placebot_core::types::{Field, QueryRows, Row, SqlValue};

use crate::error::StorageError;
use crate::migrations;

/// Connection limits applied to every statement.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub busy_timeout: Duration,
    pub query_timeout: Duration,
    pub max_rows: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

impl From<&DatabaseConfig> for DatabaseOptions {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            max_rows: config.max_rows,
        }
    }
}

/// SQLite placement database owned by one session.
pub struct Database {
    conn: Mutex<Option<Connection>>,
    interrupt: InterruptHandle,
    path: Option<PathBuf>,
    options: DatabaseOptions,
}

impl Database {
    /// Open an existing database.
    ///
    /// The file must already exist: a missing database is a connection
    /// failure, not an invitation to create an empty one.
    pub fn open(path: &Path, options: DatabaseOptions) -> Result<Self, StorageError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| {
            StorageError::Connection(format!("cannot open {}: {}", path.display(), e))
        })?;
        let db = Self::from_connection(conn, Some(path.to_path_buf()), options)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open (or create) a database and apply the placement schema.
    pub fn create(path: &Path, options: DatabaseOptions) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Internal(format!("cannot create {}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("cannot open {}: {}", path.display(), e))
        })?;
        let db = Self::from_connection(conn, Some(path.to_path_buf()), options)?;
        db.with_conn(migrations::run_migrations)?;
        info!("Database created at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database with the placement schema (for testing).
    pub fn in_memory(options: DatabaseOptions) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("cannot open in-memory db: {}", e)))?;
        let db = Self::from_connection(conn, None, options)?;
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    fn from_connection(
        conn: Connection,
        path: Option<PathBuf>,
        options: DatabaseOptions,
    ) -> Result<Self, StorageError> {
        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| StorageError::Connection(format!("failed to set busy timeout: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {}", e)))?;
        let interrupt = conn.get_interrupt_handle();
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            interrupt,
            path,
            options,
        })
    }

    /// Path of the underlying file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// Execute a closure with the underlying connection.
    ///
    /// The mutex is held for the duration of the closure. Fails with
    /// `Connection` once the database has been closed.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("database lock poisoned: {}", e)))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StorageError::Connection("connection is closed".to_string())),
        }
    }

    /// Run blocking database work off the async runtime, bounded by the
    /// query timeout. On expiry the running statement is interrupted.
    pub async fn run_blocking<F, T>(self: &Arc<Self>, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || db.with_conn(f));
        let limit = self.options.query_timeout;

        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StorageError::Internal(format!(
                "database task failed: {}",
                join_err
            ))),
            Err(_) => {
                self.interrupt.interrupt();
                let ms = limit.as_millis() as u64;
                warn!(timeout_ms = ms, "Database call timed out; statement interrupted");
                Err(StorageError::Timeout(ms))
            }
        }
    }

    /// Liveness check.
    pub async fn ping(self: &Arc<Self>) -> Result<(), StorageError> {
        self.run_blocking(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(|e| StorageError::Connection(format!("liveness check failed: {}", e)))
        })
        .await
    }

    /// Execute a read-only statement and collect its rows.
    pub async fn query(self: &Arc<Self>, sql: &str) -> Result<QueryRows, StorageError> {
        let sql = sql.to_string();
        let max_rows = self.options.max_rows;
        self.run_blocking(move |conn| query_read_only(conn, &sql, max_rows))
            .await
    }

    /// Drop the connection. Every later call fails with `Connection`.
    pub fn close(&self) {
        match self.conn.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    info!("Database connection closed");
                }
            }
            Err(e) => warn!("Database lock poisoned while closing: {}", e),
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Prepare, verify read-only, run, and normalize a statement.
///
/// Rows beyond `max_rows` are dropped and the result is marked truncated.
pub fn query_read_only(
    conn: &Connection,
    sql: &str,
    max_rows: usize,
) -> Result<QueryRows, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(|e| StorageError::rejected(&e))?;
    if !stmt.readonly() {
        return Err(StorageError::NotReadOnly);
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([]).map_err(|e| StorageError::rejected(&e))?;

    let mut out = QueryRows {
        columns: columns.clone(),
        rows: Vec::new(),
        truncated: false,
    };

    while let Some(row) = rows.next().map_err(|e| StorageError::rejected(&e))? {
        if out.rows.len() == max_rows {
            out.truncated = true;
            break;
        }
        let mut fields = Vec::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(|e| StorageError::rejected(&e))?;
            fields.push(Field {
                name: name.clone(),
                value: to_sql_value(value),
            });
        }
        out.rows.push(Row::new(fields));
    }

    debug!(rows = out.rows.len(), truncated = out.truncated, "Query executed");
    Ok(out)
}

pub(crate) fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use placebot_core::types::SqlErrorClass;

    fn memory_db() -> Arc<Database> {
        let db = Database::in_memory(DatabaseOptions::default()).unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "INSERT INTO departments (name) VALUES ('Computer Science'), ('Civil Engineering');",
            )
            .map_err(|e| StorageError::Internal(e.to_string()))
        })
        .unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn test_query_returns_named_fields_in_order() {
        let db = memory_db();
        let rows = db
            .query("SELECT department_id, name FROM departments ORDER BY department_id")
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["department_id", "name"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[0].fields[0].name, "department_id");
        assert_eq!(rows.rows[0].fields[0].value, SqlValue::Integer(1));
        assert_eq!(
            rows.rows[1].get("name"),
            Some(&SqlValue::Text("Civil Engineering".to_string()))
        );
        assert!(!rows.truncated);
    }

    #[tokio::test]
    async fn test_query_empty_result() {
        let db = memory_db();
        let rows = db
            .query("SELECT name FROM departments WHERE name = 'Nope'")
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(rows.columns, vec!["name"]);
    }

    #[tokio::test]
    async fn test_query_unknown_column_is_rejected() {
        let db = memory_db();
        let err = db.query("SELECT budget FROM departments").await.unwrap_err();
        match err {
            StorageError::Rejected { class, message } => {
                assert_eq!(class, SqlErrorClass::UnknownColumn);
                assert_eq!(message, "no such column: budget");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_unknown_table_is_rejected() {
        let db = memory_db();
        let err = db.query("SELECT * FROM internships").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Rejected {
                class: SqlErrorClass::UnknownTable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_write_statement_is_refused() {
        let db = memory_db();
        let err = db.query("DELETE FROM departments").await.unwrap_err();
        assert!(matches!(err, StorageError::NotReadOnly));

        let rows = db.query("SELECT COUNT(*) FROM departments").await.unwrap();
        assert_eq!(rows.rows[0].fields[0].value, SqlValue::Integer(2));
    }

    #[tokio::test]
    async fn test_rows_capped_at_max_rows() {
        let options = DatabaseOptions {
            max_rows: 1,
            ..DatabaseOptions::default()
        };
        let db = Database::in_memory(options).unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("INSERT INTO departments (name) VALUES ('A'), ('B'), ('C');")
                .map_err(|e| StorageError::Internal(e.to_string()))
        })
        .unwrap();
        let db = Arc::new(db);
        let rows = db.query("SELECT name FROM departments").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.truncated);
    }

    #[tokio::test]
    async fn test_closed_database_fails_with_connection_error() {
        let db = memory_db();
        assert!(db.is_open());
        db.close();
        assert!(!db.is_open());

        let err = db.ping().await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
        let err = db.query("SELECT 1").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_ping_open_database() {
        let db = memory_db();
        assert!(db.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_long_query_times_out() {
        let options = DatabaseOptions {
            query_timeout: Duration::from_millis(50),
            ..DatabaseOptions::default()
        };
        let db = Arc::new(Database::in_memory(options).unwrap());
        let err = db
            .query(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                 SELECT COUNT(*) FROM n",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout(50)));
    }

    #[test]
    fn test_open_missing_file_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sqlite");
        let err = Database::open(&path, DatabaseOptions::default()).unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_create_then_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("placementdb.sqlite");
        let created = Database::create(&path, DatabaseOptions::default()).unwrap();
        drop(created);
        assert!(path.exists());

        let db = Database::open(&path, DatabaseOptions::default()).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM placements", [], |row| row.get(0))
                    .map_err(|e| StorageError::Internal(e.to_string()))
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
