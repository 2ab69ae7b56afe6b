//! Response formatting.
//!
//! Turns an execution result into the answer text shown to the user.

use placebot_core::types::QueryRows;

use crate::executor::{Execution, ExecutionFailure};

/// Answer for an empty result set.
pub const NO_RESULTS: &str = "No results found.";

/// Prefix of every execution error answer.
pub const EXECUTION_ERROR_PREFIX: &str = "An error occurred while executing the query: ";

const COLUMN_SEPARATOR: &str = " | ";

/// Formats query results and failures as answer text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseFormatter;

impl ResponseFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Answer text for an execution.
    pub fn format(&self, execution: &Execution) -> String {
        match &execution.result {
            Ok(rows) => self.format_rows(rows),
            Err(failure) => self.format_failure(failure),
        }
    }

    /// Render a result set.
    ///
    /// Single-column results become a comma-separated list of values.
    /// Anything wider becomes a header line plus one line per row.
    pub fn format_rows(&self, rows: &QueryRows) -> String {
        if rows.is_empty() {
            return NO_RESULTS.to_string();
        }

        let single_column = rows.rows.iter().all(|r| r.len() == 1);
        let mut out = if single_column {
            rows.rows
                .iter()
                .map(|r| r.fields[0].value.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            let mut lines = Vec::with_capacity(rows.len() + 1);
            lines.push(rows.columns.join(COLUMN_SEPARATOR));
            for row in &rows.rows {
                lines.push(
                    row.fields
                        .iter()
                        .map(|f| f.value.to_string())
                        .collect::<Vec<_>>()
                        .join(COLUMN_SEPARATOR),
                );
            }
            lines.join("\n")
        };

        if rows.truncated {
            out.push_str(&format!("\n(only the first {} rows are shown)", rows.len()));
        }
        out
    }

    /// Render a failure with the fixed error template.
    pub fn format_failure(&self, failure: &ExecutionFailure) -> String {
        format!("{}{}", EXECUTION_ERROR_PREFIX, failure)
    }
}
