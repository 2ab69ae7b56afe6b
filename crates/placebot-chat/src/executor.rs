//! Query execution: raw completion in, normalized rows or a structured
//! failure out.
//!
//! The completion is first reduced to a single statement (reasoning blocks,
//! code fences, labels and prose are dropped), then guarded, then run
//! read-only against the session's database.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use placebot_core::types::{QueryRows, SqlErrorClass};
use placebot_storage::{Database, StorageError};

use crate::error::ChatError;
use crate::guard::{
    check_statement, find_terminator, leading_keyword, skip_trivia, GuardRejection, StatementKind,
};

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid think regex"));

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)(?:```|\z)").expect("valid fence regex")
});

static LEADING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\A\s*(?:sql\s*query|sql|query|answer)\s*:\s*").expect("valid label regex")
});

const STATEMENT_KEYWORDS: &str =
    "SELECT|WITH|INSERT|UPDATE|DELETE|REPLACE|CREATE|DROP|ALTER|PRAGMA|ATTACH|DETACH|VACUUM";

// Lower- or mixed-case keywords only count when followed by SQL-shaped text,
// so prose opening with "With the schema..." or "Select this..." is skipped.
const SHAPED_STATEMENT: &str = concat!(
    r"(?:select\s+(?:distinct\s+)?(?:\*|\d|'|[a-z_][\w.]*\s*(?:\(|,|;|\bfrom\b|\bas\b|$))",
    r"|with\s+(?:recursive\s+)?[a-z_]\w*\s*(?:\([^)]*\)\s*)?as\s*\(",
    r"|insert\s+into\b|delete\s+from\b|update\s+[a-z_]\w*\s+set\b",
    r"|(?:create|drop|alter)\s+(?:table|index|view|trigger)\b|pragma\s+[a-z_]\w*)",
);

static KEYWORD_AT_LINE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?m)^[ \t]*(?:{})\b", STATEMENT_KEYWORDS))
        .expect("valid keyword regex")
});

static SHAPED_AT_LINE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?im)^[ \t]*{}", SHAPED_STATEMENT)).expect("valid shaped regex")
});

static SHAPED_AT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?im)\A{}", SHAPED_STATEMENT)).expect("valid shaped regex")
});

// Mid-line matches must be upper case so prose like "help with that" is skipped.
static KEYWORD_ANYWHERE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b(?:{})\b", STATEMENT_KEYWORDS)).expect("valid keyword regex")
});

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\r?\n").expect("valid blank line regex"));

/// Reduce a raw completion to exactly one SQL statement.
///
/// The returned statement keeps its terminating `;` when there was one.
/// A second statement after the first terminator is a rejection; any other
/// trailing text is dropped.
pub fn extract_sql(raw: &str) -> Result<String, GuardRejection> {
    let without_think = THINK_BLOCK.replace_all(raw, "");
    // An unclosed reasoning block leaves only what follows its end marker.
    let text: &str = match without_think.rfind("</think>") {
        Some(idx) => &without_think[idx + "</think>".len()..],
        None => &*without_think,
    };

    let fenced = FENCED_BLOCK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    let text = fenced.unwrap_or(text);

    let text = match LEADING_LABEL.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    };

    let at_line_start = [
        KEYWORD_AT_LINE_START.find(text),
        SHAPED_AT_LINE_START.find(text),
    ]
    .into_iter()
    .flatten()
    .map(|m| m.start())
    .min();
    let start = at_line_start
        .or_else(|| KEYWORD_ANYWHERE.find(text).map(|m| m.start()))
        .ok_or(GuardRejection::NoStatement)?;
    let body = skip_line_indent(&text[start..]);

    let statement = match find_terminator(body) {
        Some(end) => {
            let remainder = skip_trivia(&body[end + 1..]);
            if starts_with_statement(remainder) {
                return Err(GuardRejection::MultipleStatements);
            }
            &body[..=end]
        }
        None => match BLANK_LINE.find(body) {
            Some(m) => &body[..m.start()],
            None => body,
        },
    };

    let statement = statement.trim();
    if statement.is_empty() || statement == ";" {
        return Err(GuardRejection::NoStatement);
    }
    Ok(statement.to_string())
}

/// Whether `text` opens with another statement rather than prose.
fn starts_with_statement(text: &str) -> bool {
    if SHAPED_AT_START.is_match(text) {
        return true;
    }
    leading_keyword(text)
        .filter(|word| !word.bytes().any(|b| b.is_ascii_lowercase()))
        .map(|word| !matches!(StatementKind::from_keyword(word), StatementKind::Other(_)))
        .unwrap_or(false)
}

fn skip_line_indent(text: &str) -> &str {
    text.trim_start_matches([' ', '\t'])
}

/// Why a generated statement produced no rows.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("{0}")]
    Guard(#[from] GuardRejection),
    /// The database refused the statement; displays the database text.
    #[error("{message}")]
    Database {
        class: SqlErrorClass,
        message: String,
    },
    #[error("the statement would modify the database; only read-only queries can be run")]
    NotReadOnly,
}

impl ExecutionFailure {
    pub fn class(&self) -> Option<SqlErrorClass> {
        match self {
            ExecutionFailure::Database { class, .. } => Some(*class),
            _ => None,
        }
    }
}

/// Result of running one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// The extracted statement, when extraction succeeded.
    pub sql: Option<String>,
    pub result: Result<QueryRows, ExecutionFailure>,
}

impl Execution {
    fn failed(sql: Option<String>, failure: ExecutionFailure) -> Self {
        Self {
            sql,
            result: Err(failure),
        }
    }
}

/// Runs generated SQL against a session database.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Extract, guard and execute the statement in `completion`.
    ///
    /// Rejections and database errors are returned inside the `Execution`.
    /// Connection loss and timeouts abort with `ChatError::Connection`.
    pub async fn execute(
        &self,
        db: &Arc<Database>,
        completion: &str,
    ) -> Result<Execution, ChatError> {
        let sql = match extract_sql(completion) {
            Ok(sql) => sql,
            Err(rejection) => {
                warn!(reason = %rejection, "Completion rejected before execution");
                return Ok(Execution::failed(None, rejection.into()));
            }
        };

        if let Err(rejection) = check_statement(&sql) {
            warn!(sql = %sql, reason = %rejection, "Statement rejected by guard");
            return Ok(Execution::failed(Some(sql), rejection.into()));
        }

        debug!(sql = %sql, "Executing generated query");
        match db.query(&sql).await {
            Ok(rows) => {
                debug!(rows = rows.len(), truncated = rows.truncated, "Query returned");
                Ok(Execution {
                    sql: Some(sql),
                    result: Ok(rows),
                })
            }
            Err(StorageError::Rejected { class, message }) => {
                warn!(sql = %sql, class = %class, error = %message, "Database rejected query");
                Ok(Execution::failed(
                    Some(sql),
                    ExecutionFailure::Database { class, message },
                ))
            }
            Err(StorageError::NotReadOnly) => {
                warn!(sql = %sql, "Statement is not read-only");
                Ok(Execution::failed(Some(sql), ExecutionFailure::NotReadOnly))
            }
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use placebot_core::types::SqlValue;
    use placebot_storage::{seed_demo_data, DatabaseOptions};

    fn seeded_db() -> Arc<Database> {
        let db = Database::in_memory(DatabaseOptions::default()).unwrap();
        db.with_conn(|conn| seed_demo_data(conn).map(|_| ())).unwrap();
        Arc::new(db)
    }

    // ---- Extraction ----

    #[test]
    fn test_extract_plain_statement() {
        assert_eq!(
            extract_sql("SELECT COUNT(*) FROM students;").unwrap(),
            "SELECT COUNT(*) FROM students;"
        );
        assert_eq!(extract_sql("  SELECT 1  ").unwrap(), "SELECT 1");
    }

    #[test]
    fn test_extract_strips_label() {
        assert_eq!(
            extract_sql(" SQL Query: SELECT name FROM companies;").unwrap(),
            "SELECT name FROM companies;"
        );
        assert_eq!(extract_sql("SQL:\nSELECT 1;").unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_extract_from_code_fence() {
        let raw = "Here you go:\n```sql\nSELECT name\nFROM departments;\n```\nThis lists departments.";
        assert_eq!(
            extract_sql(raw).unwrap(),
            "SELECT name\nFROM departments;"
        );
    }

    #[test]
    fn test_extract_from_unclosed_fence() {
        let raw = "```sql\nSELECT 1;";
        assert_eq!(extract_sql(raw).unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_extract_drops_think_block() {
        let raw = "<think>Maybe DELETE the rows? No; select them.</think>\nSELECT COUNT(*) FROM placements;";
        assert_eq!(
            extract_sql(raw).unwrap(),
            "SELECT COUNT(*) FROM placements;"
        );
    }

    #[test]
    fn test_extract_drops_preamble_and_trailing_prose() {
        let raw = "Sure! The query you need is:\nSELECT COUNT(*) FROM placements WHERE status = 'Placed';\nThis counts placed students.";
        assert_eq!(
            extract_sql(raw).unwrap(),
            "SELECT COUNT(*) FROM placements WHERE status = 'Placed';"
        );
    }

    #[test]
    fn test_extract_unterminated_stops_at_blank_line() {
        let raw = "SELECT name FROM companies\n\nThe query above lists companies.";
        assert_eq!(extract_sql(raw).unwrap(), "SELECT name FROM companies");
    }

    #[test]
    fn test_extract_keeps_quoted_semicolon() {
        let raw = "SELECT * FROM companies WHERE name = 'A;B';";
        assert_eq!(extract_sql(raw).unwrap(), raw);
    }

    #[test]
    fn test_extract_multiple_statements_rejected() {
        assert_eq!(
            extract_sql("SELECT 1; DROP TABLE students;"),
            Err(GuardRejection::MultipleStatements)
        );
        assert_eq!(
            extract_sql("SELECT 1;\n-- and then\nselect 2;"),
            Err(GuardRejection::MultipleStatements)
        );
    }

    #[test]
    fn test_extract_skips_prose_opening_with_keyword() {
        let raw = "With the schema above, the query is:\nSELECT COUNT(*) FROM placements WHERE status = 'Placed';";
        assert_eq!(
            extract_sql(raw).unwrap(),
            "SELECT COUNT(*) FROM placements WHERE status = 'Placed';"
        );
        let raw = "Select the right table first.\nSELECT name FROM companies;";
        assert_eq!(extract_sql(raw).unwrap(), "SELECT name FROM companies;");
    }

    #[test]
    fn test_extract_trailing_prose_with_keyword_is_dropped() {
        let raw = "SELECT COUNT(*) FROM placements WHERE status = 'Placed';\nSelect this query to count placed students.";
        assert_eq!(
            extract_sql(raw).unwrap(),
            "SELECT COUNT(*) FROM placements WHERE status = 'Placed';"
        );
        let raw = "SELECT name FROM companies;\nWith that you get every company.";
        assert_eq!(extract_sql(raw).unwrap(), "SELECT name FROM companies;");
    }

    #[test]
    fn test_extract_lowercase_sql() {
        assert_eq!(
            extract_sql("Here it is:\nselect count(*) from students;").unwrap(),
            "select count(*) from students;"
        );
        let raw = "with placed as (select * from placements where status = 'Placed') select count(*) from placed;";
        assert_eq!(extract_sql(raw).unwrap(), raw);
        assert_eq!(
            extract_sql("select name from companies; delete from companies;"),
            Err(GuardRejection::MultipleStatements)
        );
    }

    #[test]
    fn test_extract_no_statement() {
        assert_eq!(
            extract_sql("I'm sorry, I cannot help with that."),
            Err(GuardRejection::NoStatement)
        );
        assert_eq!(extract_sql(""), Err(GuardRejection::NoStatement));
    }

    #[test]
    fn test_extract_keeps_disallowed_for_guard() {
        assert_eq!(
            extract_sql("DELETE FROM students;").unwrap(),
            "DELETE FROM students;"
        );
    }

    // ---- Execution ----

    #[tokio::test]
    async fn test_execute_count() {
        let db = seeded_db();
        let exec = QueryExecutor::new()
            .execute(&db, "SELECT COUNT(*) FROM placements WHERE status = 'Placed';")
            .await
            .unwrap();
        let rows = exec.result.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.rows[0].fields[0].value, SqlValue::Integer(4));
        assert_eq!(
            exec.sql.as_deref(),
            Some("SELECT COUNT(*) FROM placements WHERE status = 'Placed';")
        );
    }

    #[tokio::test]
    async fn test_execute_unknown_column() {
        let db = seeded_db();
        let exec = QueryExecutor::new()
            .execute(&db, "SELECT placement_date FROM placements;")
            .await
            .unwrap();
        let failure = exec.result.unwrap_err();
        assert_eq!(failure.class(), Some(SqlErrorClass::UnknownColumn));
        assert_eq!(failure.to_string(), "no such column: placement_date");
    }

    #[tokio::test]
    async fn test_execute_guard_never_touches_database() {
        let db = seeded_db();
        for raw in [
            "DELETE FROM placements;",
            "UPDATE students SET cgpa = 10;",
            "DROP TABLE companies;",
            "INSERT INTO departments (name) VALUES ('Physics');",
            "PRAGMA foreign_keys = OFF;",
        ] {
            let exec = QueryExecutor::new().execute(&db, raw).await.unwrap();
            assert!(matches!(
                exec.result,
                Err(ExecutionFailure::Guard(GuardRejection::DisallowedStatementKind(_)))
            ));
        }
        let rows = db.query("SELECT COUNT(*) FROM placements").await.unwrap();
        assert_eq!(rows.rows[0].fields[0].value, SqlValue::Integer(6));
        let rows = db.query("SELECT COUNT(*) FROM departments").await.unwrap();
        assert_eq!(rows.rows[0].fields[0].value, SqlValue::Integer(5));
    }

    #[tokio::test]
    async fn test_execute_writing_cte_refused() {
        let db = seeded_db();
        let exec = QueryExecutor::new()
            .execute(
                &db,
                "WITH doomed AS (SELECT student_id FROM students) DELETE FROM placements WHERE student_id IN doomed;",
            )
            .await
            .unwrap();
        assert_eq!(exec.result, Err(ExecutionFailure::NotReadOnly));
        let rows = db.query("SELECT COUNT(*) FROM placements").await.unwrap();
        assert_eq!(rows.rows[0].fields[0].value, SqlValue::Integer(6));
    }

    #[tokio::test]
    async fn test_execute_no_statement() {
        let db = seeded_db();
        let exec = QueryExecutor::new()
            .execute(&db, "I don't know.")
            .await
            .unwrap();
        assert!(exec.sql.is_none());
        assert_eq!(
            exec.result,
            Err(ExecutionFailure::Guard(GuardRejection::NoStatement))
        );
    }

    #[tokio::test]
    async fn test_execute_closed_database_aborts() {
        let db = seeded_db();
        db.close();
        let err = QueryExecutor::new()
            .execute(&db, "SELECT 1;")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Connection(_)));
    }
}
