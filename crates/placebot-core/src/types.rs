use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Conversation
// =============================================================================

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person asking questions.
    User,
    /// The SQL assistant.
    Assistant,
}

impl Role {
    /// Label used when the role is rendered into text.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of a conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Query results
// =============================================================================

/// A scalar value read from a result set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Real(r) => {
                // Whole reals keep one decimal so 35.0 does not read as an integer.
                if r.is_finite() && r.fract() == 0.0 && r.abs() < 1e15 {
                    write!(f, "{:.1}", r)
                } else {
                    write!(f, "{}", r)
                }
            }
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Blob(bytes) => {
                f.write_str("x'")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                f.write_str("'")
            }
        }
    }
}

/// A named value inside a row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: SqlValue,
}

/// One result row: fields in the order the statement selected them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub fields: Vec<Field>,
}

impl Row {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a value by column name (first match).
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

/// Normalized result set of one executed statement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    /// Column names in select order.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// True when rows beyond the configured cap were dropped.
    #[serde(default)]
    pub truncated: bool,
}

impl QueryRows {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Classification of a database rejection, derived from the database message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlErrorClass {
    Syntax,
    UnknownColumn,
    UnknownTable,
    Other,
}

impl SqlErrorClass {
    /// Classify a database error message.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("no such column")
            || (msg.contains("column") && (msg.contains("unknown") || msg.contains("does not exist")))
        {
            SqlErrorClass::UnknownColumn
        } else if msg.contains("no such table")
            || (msg.contains("table") && (msg.contains("doesn't exist") || msg.contains("does not exist")))
        {
            SqlErrorClass::UnknownTable
        } else if msg.contains("syntax error")
            || msg.contains("incomplete input")
            || msg.contains("unrecognized token")
        {
            SqlErrorClass::Syntax
        } else {
            SqlErrorClass::Other
        }
    }
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::Syntax => write!(f, "SyntaxError"),
            SqlErrorClass::UnknownColumn => write!(f, "UnknownColumnError"),
            SqlErrorClass::UnknownTable => write!(f, "UnknownTableError"),
            SqlErrorClass::Other => write!(f, "ExecutionError"),
        }
    }
}
