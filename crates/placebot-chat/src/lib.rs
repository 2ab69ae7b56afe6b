//! Conversational SQL engine for placebot.
//!
//! Turns a question about the placement database into a single read-only
//! query, runs it, and phrases the result as an answer. Sessions keep the
//! history each prompt is built from.

pub mod error;
pub mod executor;
pub mod generator;
pub mod guard;
pub mod orchestrator;
pub mod prompt;
pub mod response;
pub mod session;

pub use error::ChatError;
pub use executor::{extract_sql, Execution, ExecutionFailure, QueryExecutor};
pub use generator::QueryGenerator;
pub use guard::{check_statement, GuardRejection, StatementKind};
pub use orchestrator::{Pipeline, TurnReply, TurnStatus};
pub use prompt::{decompose, PromptComposer, PromptParts, EMPTY_HISTORY};
pub use response::{ResponseFormatter, EXECUTION_ERROR_PREFIX, NO_RESULTS};
pub use session::{
    DatabaseOpener, Session, SessionRegistry, SessionState, SessionSummary, GENERIC_FAILURE,
};
