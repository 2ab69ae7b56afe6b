//! Schema introspection.
//!
//! Produces the textual schema description fed to the prompt: one
//! `CREATE TABLE`-like block per user table, ordered by table name, with
//! optional sample rows underneath.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;

use placebot_core::config::DatabaseConfig;

use crate::db::{to_sql_value, Database};
use crate::error::StorageError;

/// Tables that hold bookkeeping rather than placement data.
const HIDDEN_TABLES: &[&str] = &["schema_migrations"];

struct ColumnInfo {
    name: String,
    declared_type: String,
    not_null: bool,
    primary_key: bool,
}

struct ForeignKey {
    from: String,
    table: String,
    to: Option<String>,
}

/// Describes the live database for prompt composition.
#[derive(Debug)]
pub struct SchemaIntrospector {
    sample_rows: usize,
    cache_enabled: bool,
    cache: Mutex<Option<String>>,
}

impl SchemaIntrospector {
    pub fn new(sample_rows: usize, cache_enabled: bool) -> Self {
        Self {
            sample_rows,
            cache_enabled,
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(config.sample_rows, config.cache_schema)
    }

    /// Describe the database behind `db`.
    ///
    /// Liveness is checked on every call, cached or not.
    pub async fn describe(&self, db: &Arc<Database>) -> Result<String, StorageError> {
        db.ping().await?;

        if self.cache_enabled {
            if let Some(cached) = self.cached() {
                debug!("Using cached schema description");
                return Ok(cached);
            }
        }

        let sample_rows = self.sample_rows;
        let text = db
            .run_blocking(move |conn| describe_conn(conn, sample_rows))
            .await?;

        if self.cache_enabled {
            if let Ok(mut guard) = self.cache.lock() {
                *guard = Some(text.clone());
            }
        }
        Ok(text)
    }

    /// Forget any cached description.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.cache.lock() {
            guard.take();
        }
    }

    fn cached(&self) -> Option<String> {
        self.cache.lock().ok().and_then(|g| g.clone())
    }
}

/// Build the schema description from an open connection.
pub fn describe_conn(conn: &Connection, sample_rows: usize) -> Result<String, StorageError> {
    let tables = list_tables(conn)?;
    let mut blocks = Vec::with_capacity(tables.len());

    for table in &tables {
        let mut block = table_block(conn, table)?;
        if sample_rows > 0 {
            block.push_str("\n\n");
            block.push_str(&sample_block(conn, table, sample_rows)?);
        }
        blocks.push(block);
    }

    Ok(blocks.join("\n\n"))
}

fn introspection_err(e: rusqlite::Error) -> StorageError {
    StorageError::Internal(format!("schema introspection failed: {}", e))
}

fn list_tables(conn: &Connection) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .map_err(introspection_err)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(introspection_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(introspection_err)?;
    Ok(names
        .into_iter()
        .filter(|n| !HIDDEN_TABLES.contains(&n.as_str()))
        .collect())
}

fn table_block(conn: &Connection, table: &str) -> Result<String, StorageError> {
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(introspection_err)?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
            })
        })
        .map_err(introspection_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(introspection_err)?;

    let mut stmt = conn
        .prepare(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )
        .map_err(introspection_err)?;
    let foreign_keys = stmt
        .query_map([table], |row| {
            Ok(ForeignKey {
                from: row.get(0)?,
                table: row.get(1)?,
                to: row.get(2)?,
            })
        })
        .map_err(introspection_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(introspection_err)?;

    let mut lines = Vec::with_capacity(columns.len() + foreign_keys.len());
    for col in &columns {
        let mut line = format!("\t{}", col.name);
        if !col.declared_type.is_empty() {
            line.push(' ');
            line.push_str(&col.declared_type);
        }
        if col.not_null {
            line.push_str(" NOT NULL");
        }
        if col.primary_key {
            line.push_str(" PRIMARY KEY");
        }
        lines.push(line);
    }
    for fk in &foreign_keys {
        let target = fk.to.as_deref().unwrap_or("rowid");
        lines.push(format!(
            "\tFOREIGN KEY ({}) REFERENCES {}({})",
            fk.from, fk.table, target
        ));
    }

    Ok(format!("CREATE TABLE {} (\n{}\n)", table, lines.join(",\n")))
}

fn sample_block(conn: &Connection, table: &str, limit: usize) -> Result<String, StorageError> {
    let sql = format!(
        "SELECT * FROM {} ORDER BY rowid LIMIT {}",
        quote_identifier(table),
        limit
    );
    let mut stmt = conn.prepare(&sql).map_err(introspection_err)?;
    let header = stmt.column_names().join("\t");
    let width = stmt.column_count();

    let mut lines = Vec::new();
    let mut rows = stmt.query([]).map_err(introspection_err)?;
    while let Some(row) = rows.next().map_err(introspection_err)? {
        let mut cells = Vec::with_capacity(width);
        for idx in 0..width {
            let value = row.get_ref(idx).map_err(introspection_err)?;
            cells.push(to_sql_value(value).to_string());
        }
        lines.push(cells.join("\t"));
    }

    let mut out = format!("/*\n{} rows from {} table:\n{}", lines.len(), table, header);
    for line in lines {
        out.push('\n');
        out.push_str(&line);
    }
    out.push_str("\n*/");
    Ok(out)
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
