//! Turn pipeline: introspect, compose, generate, execute, format.
//!
//! One `Pipeline` serves one session and owns that session's database
//! handle. `handle_turn` never touches history; the session does that.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use placebot_core::config::PlacebotConfig;
use placebot_core::types::HistoryTurn;
use placebot_llm::CompletionService;
use placebot_storage::{Database, SchemaIntrospector};

use crate::error::ChatError;
use crate::executor::QueryExecutor;
use crate::generator::QueryGenerator;
use crate::prompt::PromptComposer;
use crate::response::ResponseFormatter;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The query ran; the answer holds its result.
    Answered,
    /// The statement was rejected by the guard or the database.
    ExecutionError,
    /// The database or completion service was unreachable.
    Aborted,
    /// Something unexpected failed.
    Failed,
}

/// The assistant's reply to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    pub answer: String,
    /// The statement that was executed or rejected, if one was extracted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    pub status: TurnStatus,
}

/// The per-session chain of pipeline stages.
pub struct Pipeline {
    db: Arc<Database>,
    introspector: SchemaIntrospector,
    composer: PromptComposer,
    generator: QueryGenerator,
    executor: QueryExecutor,
    formatter: ResponseFormatter,
}

impl Pipeline {
    pub fn new(
        db: Arc<Database>,
        service: Arc<dyn CompletionService>,
        config: &PlacebotConfig,
    ) -> Self {
        Self {
            db,
            introspector: SchemaIntrospector::from_config(&config.database),
            composer: PromptComposer::new(config.chat.history_turns),
            generator: QueryGenerator::new(service, &config.completion),
            executor: QueryExecutor::new(),
            formatter: ResponseFormatter::new(),
        }
    }

    /// Replace the query generator (tests shorten its backoff).
    pub fn with_generator(mut self, generator: QueryGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Current schema description of the session database.
    pub async fn schema(&self) -> Result<String, ChatError> {
        Ok(self.introspector.describe(&self.db).await?)
    }

    /// Answer one question given the prior history.
    ///
    /// Fails with `Connection` before any completion call when the database
    /// is unreachable, and with `Service` when the completion service is.
    /// Statement rejections are answers, not errors.
    pub async fn handle_turn(
        &self,
        question: &str,
        history: &[HistoryTurn],
    ) -> Result<TurnReply, ChatError> {
        let schema = self.introspector.describe(&self.db).await?;
        let prompt = self.composer.compose(&schema, history, question);
        debug!(prompt_chars = prompt.len(), history = history.len(), "Prompt composed");

        let completion = self.generator.generate(&prompt).await?;
        let execution = self.executor.execute(&self.db, &completion).await?;
        let answer = self.formatter.format(&execution);

        let status = if execution.result.is_ok() {
            TurnStatus::Answered
        } else {
            TurnStatus::ExecutionError
        };
        info!(status = ?status, service = self.generator.service_name(), "Turn handled");

        Ok(TurnReply {
            answer,
            sql: execution.sql,
            status,
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("db", &self.db)
            .field("generator", &self.generator)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
