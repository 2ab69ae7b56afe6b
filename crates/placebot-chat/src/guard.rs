//! Statement guard for generated SQL.
//!
//! Generated SQL is untrusted. Before anything reaches the database the
//! leading keyword is classified against an allow-list; everything other
//! than `SELECT` and `WITH` is refused. `WITH` is additionally held to the
//! read-only check the storage layer performs on the prepared statement.

use std::fmt;

/// Kind of statement, from its leading keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    With,
    Insert,
    Update,
    Delete,
    Replace,
    Create,
    Drop,
    Alter,
    Pragma,
    Attach,
    Detach,
    Vacuum,
    Other(String),
}

impl StatementKind {
    /// Classify from a keyword, case-insensitively.
    pub fn from_keyword(word: &str) -> Self {
        match word.to_ascii_uppercase().as_str() {
            "SELECT" => StatementKind::Select,
            "WITH" => StatementKind::With,
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "REPLACE" => StatementKind::Replace,
            "CREATE" => StatementKind::Create,
            "DROP" => StatementKind::Drop,
            "ALTER" => StatementKind::Alter,
            "PRAGMA" => StatementKind::Pragma,
            "ATTACH" => StatementKind::Attach,
            "DETACH" => StatementKind::Detach,
            "VACUUM" => StatementKind::Vacuum,
            other => StatementKind::Other(other.to_string()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, StatementKind::Select | StatementKind::With)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            StatementKind::Select => "SELECT",
            StatementKind::With => "WITH",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Replace => "REPLACE",
            StatementKind::Create => "CREATE",
            StatementKind::Drop => "DROP",
            StatementKind::Alter => "ALTER",
            StatementKind::Pragma => "PRAGMA",
            StatementKind::Attach => "ATTACH",
            StatementKind::Detach => "DETACH",
            StatementKind::Vacuum => "VACUUM",
            StatementKind::Other(word) => word.as_str(),
        };
        f.write_str(word)
    }
}

/// Why a completion was refused before execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardRejection {
    #[error("the model reply did not contain a SQL statement")]
    NoStatement,
    #[error("the model reply contained more than one SQL statement; only one can be run per question")]
    MultipleStatements,
    #[error("{0} statements are not allowed; only read-only SELECT queries can be run")]
    DisallowedStatementKind(StatementKind),
}

/// Check an extracted statement against the allow-list.
pub fn check_statement(sql: &str) -> Result<StatementKind, GuardRejection> {
    let word = leading_keyword(sql).ok_or(GuardRejection::NoStatement)?;
    let kind = StatementKind::from_keyword(word);
    if kind.is_allowed() {
        Ok(kind)
    } else {
        Err(GuardRejection::DisallowedStatementKind(kind))
    }
}

/// First word of `sql` after whitespace and comments.
pub fn leading_keyword(sql: &str) -> Option<&str> {
    let rest = skip_trivia(sql);
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

/// Skip leading whitespace, `--` line comments and `/* */` block comments.
pub fn skip_trivia(mut sql: &str) -> &str {
    loop {
        let trimmed = sql.trim_start();
        if let Some(rest) = trimmed.strip_prefix("--") {
            sql = match rest.find('\n') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        } else if let Some(rest) = trimmed.strip_prefix("/*") {
            sql = match rest.find("*/") {
                Some(idx) => &rest[idx + 2..],
                None => "",
            };
        } else {
            return trimmed;
        }
    }
}

/// Byte offset of the first `;` outside quotes, identifiers and comments.
pub fn find_terminator(sql: &str) -> Option<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let bytes = sql.as_bytes();
    let mut state = State::Code;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        let next = bytes.get(i + 1).map(|b| *b as char);
        match state {
            State::Code => match c {
                ';' => return Some(i),
                '\'' | '"' | '`' => state = State::Quoted(c),
                '[' => state = State::Quoted(']'),
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    i += 1;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment;
                    i += 1;
                }
                _ => {}
            },
            State::Quoted(close) => {
                if c == close {
                    // A doubled quote is an escaped quote.
                    if close != ']' && next == Some(close) {
                        i += 1;
                    } else {
                        state = State::Code;
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = State::Code;
                    i += 1;
                }
            }
        }
        i += 1;
    }
    None
}
