//! Database schema migrations.
//!
//! Applies the placement schema: departments, students, companies,
//! placements, and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use crate::error::StorageError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| StorageError::Internal(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Internal(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: placement_schema");
    }

    Ok(())
}

/// Version 1: placement schema.
fn apply_v1(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS departments (
            department_id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS students (
            student_id      INTEGER PRIMARY KEY AUTOINCREMENT,
            usn             TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            department_id   INTEGER NOT NULL,
            cgpa            REAL NOT NULL,
            email           TEXT,
            phone           TEXT,
            gender          TEXT CHECK (gender IN ('Male', 'Female', 'Other')),
            date_of_birth   TEXT,
            FOREIGN KEY (department_id) REFERENCES departments(department_id)
        );

        CREATE INDEX IF NOT EXISTS idx_students_department
            ON students (department_id);

        CREATE TABLE IF NOT EXISTS companies (
            company_id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name                TEXT NOT NULL UNIQUE,
            eligibility_cgpa    REAL NOT NULL,
            max_package         REAL,
            min_package         REAL
        );

        CREATE TABLE IF NOT EXISTS placements (
            placement_id    INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id      INTEGER NOT NULL,
            company_id      INTEGER NOT NULL,
            status          TEXT
                            CHECK (status IN ('Placed', 'Not Placed', 'Pending')),
            package_offered REAL,
            FOREIGN KEY (student_id) REFERENCES students(student_id) ON DELETE CASCADE,
            FOREIGN KEY (company_id) REFERENCES companies(company_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_placements_student
            ON placements (student_id);

        CREATE INDEX IF NOT EXISTS idx_placements_company_status
            ON placements (company_id, status);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'placement_schema');
        ",
    )
    .map_err(|e| StorageError::Internal(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
