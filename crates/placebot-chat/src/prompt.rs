//! Prompt composition.
//!
//! Substitutes the schema description, the rendered conversation history
//! and the question into a fixed instructional template. Composition is
//! lossless: [`decompose`] recovers the three inputs from a composed prompt
//! as long as the schema text has no line reading `SCHEMA>>>`.

use placebot_core::types::{HistoryTurn, Role};

const PREFIX: &str = "You are an intelligent SQL assistant helping users query a college placement database.
The database contains information about students, departments, companies, and placements.
The database engine is SQLite, so write SQLite SQL.

Schema Details:
<<<SCHEMA
";

const AFTER_SCHEMA: &str = "
SCHEMA>>>

Conversation History:
<<<HISTORY
";

const AFTER_HISTORY: &str = "
HISTORY>>>

Rules:
1. Reference only the tables and columns listed in Schema Details.
2. Reply with exactly one SQL statement and nothing else. No explanation, no markdown.
3. Include only the necessary columns and use joins, conditions and aggregations the way the examples do.

Example:
Question: How many students were placed?
SQL Query: SELECT COUNT(*) FROM placements WHERE status = 'Placed';

Question: Which department has the highest number of placements?
SQL Query:
SELECT d.name AS department_name, COUNT(p.placement_id) AS total_placements
FROM placements p
JOIN students s ON p.student_id = s.student_id
JOIN departments d ON s.department_id = d.department_id
WHERE p.status = 'Placed'
GROUP BY d.name
ORDER BY total_placements DESC
LIMIT 1;

Now, based on the provided schema and conversation history, generate the SQL query:
Question: ";

const SUFFIX: &str = "
SQL Query:";

/// Rendered in place of an empty history.
pub const EMPTY_HISTORY: &str = "(no previous messages)";

/// Continuation indent for multi-line turn text.
const CONTINUATION: &str = "  ";

/// The three values substituted into a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptParts {
    pub schema: String,
    pub history: Vec<(Role, String)>,
    pub question: String,
}

/// Builds prompts from the fixed template.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    /// Most recent turns rendered into the prompt.
    history_turns: usize,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self { history_turns: 10 }
    }
}

impl PromptComposer {
    pub fn new(history_turns: usize) -> Self {
        Self { history_turns }
    }

    /// Compose the prompt for one turn.
    pub fn compose(&self, schema: &str, history: &[HistoryTurn], question: &str) -> String {
        let skip = history.len().saturating_sub(self.history_turns);
        let recent = &history[skip..];
        let rendered = render_history(recent.iter().map(|t| (t.role, t.text.as_str())));

        let mut prompt = String::with_capacity(
            PREFIX.len()
                + schema.len()
                + AFTER_SCHEMA.len()
                + rendered.len()
                + AFTER_HISTORY.len()
                + question.len()
                + SUFFIX.len(),
        );
        prompt.push_str(PREFIX);
        prompt.push_str(schema);
        prompt.push_str(AFTER_SCHEMA);
        prompt.push_str(&rendered);
        prompt.push_str(AFTER_HISTORY);
        prompt.push_str(question);
        prompt.push_str(SUFFIX);
        prompt
    }
}

/// Render turns as `User: ` / `Assistant: ` lines.
///
/// Embedded newlines continue on the next line behind a two-space indent,
/// so no rendered line can be mistaken for a section delimiter.
pub fn render_history<'a, I>(turns: I) -> String
where
    I: IntoIterator<Item = (Role, &'a str)>,
{
    let mut lines = Vec::new();
    for (role, text) in turns {
        let mut parts = text.split('\n');
        let first = parts.next().unwrap_or_default();
        lines.push(format!("{}: {}", role.label(), first));
        for rest in parts {
            lines.push(format!("{}{}", CONTINUATION, rest));
        }
    }
    if lines.is_empty() {
        EMPTY_HISTORY.to_string()
    } else {
        lines.join("\n")
    }
}

/// Inverse of [`render_history`]. Returns `None` on text it could not
/// have produced.
pub fn parse_history(rendered: &str) -> Option<Vec<(Role, String)>> {
    if rendered == EMPTY_HISTORY {
        return Some(Vec::new());
    }

    let mut turns: Vec<(Role, String)> = Vec::new();
    for line in rendered.split('\n') {
        if let Some(rest) = line.strip_prefix(CONTINUATION) {
            let (_, text) = turns.last_mut()?;
            text.push('\n');
            text.push_str(rest);
        } else if let Some(text) = line.strip_prefix("User: ") {
            turns.push((Role::User, text.to_string()));
        } else if let Some(text) = line.strip_prefix("Assistant: ") {
            turns.push((Role::Assistant, text.to_string()));
        } else {
            return None;
        }
    }
    Some(turns)
}

/// Recover the schema, history and question from a composed prompt.
pub fn decompose(prompt: &str) -> Option<PromptParts> {
    let body = prompt.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;

    let schema_end = body.find(AFTER_SCHEMA)?;
    let schema = &body[..schema_end];
    let rest = &body[schema_end + AFTER_SCHEMA.len()..];

    let history_end = rest.find(AFTER_HISTORY)?;
    let history = parse_history(&rest[..history_end])?;
    let question = &rest[history_end + AFTER_HISTORY.len()..];

    Some(PromptParts {
        schema: schema.to_string(),
        history,
        question: question.to_string(),
    })
}
