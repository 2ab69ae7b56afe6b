//! Demo placement data.
//!
//! A small, fixed data set: five departments, six students, five
//! companies, six placement outcomes. Seeding is skipped when the
//! departments table already holds rows.

use rusqlite::{params, Connection};
use tracing::info;

use crate::error::StorageError;

const DEPARTMENTS: &[&str] = &[
    "Computer Science",
    "Information Technology",
    "Electronics and Communication",
    "Mechanical Engineering",
    "Civil Engineering",
];

// (usn, name, department_id, cgpa, email, phone, gender, date_of_birth)
type StudentSeed = (&'static str, &'static str, i64, f64, &'static str, &'static str, &'static str, &'static str);

const STUDENTS: &[StudentSeed] = &[
    ("CS001", "Alice Johnson", 1, 8.5, "alice.johnson@example.com", "9876543210", "Female", "2000-05-15"),
    ("CS002", "Bob Smith", 1, 7.8, "bob.smith@example.com", "9123456780", "Male", "1999-11-22"),
    ("IT001", "Charlie Brown", 2, 9.2, "charlie.brown@example.com", "9876512345", "Male", "2001-03-10"),
    ("EC001", "Diana Green", 3, 8.0, "diana.green@example.com", "9876540987", "Female", "1998-09-30"),
    ("ME001", "Edward Davis", 4, 7.5, "edward.davis@example.com", "9876523451", "Male", "2000-01-20"),
    ("CE001", "Fiona Harris", 5, 8.9, "fiona.harris@example.com", "9876598765", "Female", "1999-07-18"),
];

// (name, eligibility_cgpa, max_package, min_package)
const COMPANIES: &[(&str, f64, f64, f64)] = &[
    ("Google", 8.0, 35.0, 15.0),
    ("Microsoft", 7.5, 30.0, 12.0),
    ("Amazon", 8.0, 28.0, 10.0),
    ("Infosys", 6.5, 8.0, 3.5),
    ("TCS", 6.0, 6.0, 3.0),
];

// (student_id, company_id, status, package_offered)
const PLACEMENTS: &[(i64, i64, &str, Option<f64>)] = &[
    (1, 1, "Placed", Some(35.0)),
    (2, 2, "Placed", Some(12.0)),
    (3, 1, "Not Placed", None),
    (4, 4, "Placed", Some(3.8)),
    (5, 5, "Placed", Some(3.5)),
    (6, 3, "Pending", None),
];

/// Counts of rows written by [`seed_demo_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub departments: usize,
    pub students: usize,
    pub companies: usize,
    pub placements: usize,
}

impl SeedReport {
    pub fn is_empty(&self) -> bool {
        self.departments + self.students + self.companies + self.placements == 0
    }
}

/// Insert the demo data set in one transaction.
///
/// Returns an empty report when the database already has departments.
pub fn seed_demo_data(conn: &Connection) -> Result<SeedReport, StorageError> {
    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM departments", [], |row| row.get(0))
        .map_err(|e| StorageError::Internal(format!("Failed to inspect departments: {}", e)))?;
    if existing > 0 {
        info!(existing, "Database already seeded, skipping demo data");
        return Ok(SeedReport::default());
    }

    let seed_err = |e: rusqlite::Error| StorageError::Internal(format!("Failed to seed demo data: {}", e));

    let tx = conn.unchecked_transaction().map_err(seed_err)?;
    let mut report = SeedReport::default();

    for name in DEPARTMENTS {
        tx.execute("INSERT INTO departments (name) VALUES (?1)", params![name])
            .map_err(seed_err)?;
        report.departments += 1;
    }

    for (usn, name, dept, cgpa, email, phone, gender, dob) in STUDENTS {
        tx.execute(
            "INSERT INTO students (usn, name, department_id, cgpa, email, phone, gender, date_of_birth)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![usn, name, dept, cgpa, email, phone, gender, dob],
        )
        .map_err(seed_err)?;
        report.students += 1;
    }

    for (name, eligibility, max_package, min_package) in COMPANIES {
        tx.execute(
            "INSERT INTO companies (name, eligibility_cgpa, max_package, min_package)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, eligibility, max_package, min_package],
        )
        .map_err(seed_err)?;
        report.companies += 1;
    }

    for (student, company, status, package) in PLACEMENTS {
        tx.execute(
            "INSERT INTO placements (student_id, company_id, status, package_offered)
             VALUES (?1, ?2, ?3, ?4)",
            params![student, company, status, package],
        )
        .map_err(seed_err)?;
        report.placements += 1;
    }

    tx.commit().map_err(seed_err)?;
    info!(
        departments = report.departments,
        students = report.students,
        companies = report.companies,
        placements = report.placements,
        "Seeded demo placement data"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    fn seeded_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        seed_demo_data(&conn).unwrap();
        conn
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_seed_counts() {
        let conn = seeded_conn();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM departments"), 5);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM students"), 6);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM companies"), 5);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM placements"), 6);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM placements WHERE status = 'Placed'"),
            4
        );
    }

    #[test]
    fn test_seed_is_idempotent() {
        let conn = seeded_conn();
        let report = seed_demo_data(&conn).unwrap();
        assert!(report.is_empty());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM students"), 6);
    }

    #[test]
    fn test_seed_relationships() {
        let conn = seeded_conn();
        let name: String = conn
            .query_row(
                "SELECT s.name FROM placements p
                 JOIN students s ON s.student_id = p.student_id
                 JOIN companies c ON c.company_id = p.company_id
                 WHERE c.name = 'Google' AND p.status = 'Placed'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Alice Johnson");
    }

    #[test]
    fn test_report_from_fresh_seed() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let report = seed_demo_data(&conn).unwrap();
        assert_eq!(
            report,
            SeedReport {
                departments: 5,
                students: 6,
                companies: 5,
                placements: 6,
            }
        );
    }
}
