//! Conversation sessions.
//!
//! A `Session` owns one pipeline (and so one database connection), its
//! history, and the Idle/Processing state. `SessionRegistry` creates, looks
//! up, lists, expires and deletes sessions.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use placebot_core::config::{ChatConfig, PlacebotConfig};
use placebot_core::types::HistoryTurn;
use placebot_llm::CompletionService;
use placebot_storage::{Database, DatabaseOptions, SchemaIntrospector, StorageError};

use crate::error::ChatError;
use crate::orchestrator::{Pipeline, TurnReply, TurnStatus};

/// Answer for failures that are neither connection nor service related.
pub const GENERIC_FAILURE: &str = "Sorry, something went wrong while answering that question.";

// =============================================================================
// Session
// =============================================================================

/// Whether a session is answering a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Processing,
}

/// Resets the Processing flag however the turn ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One conversation.
pub struct Session {
    id: Uuid,
    pipeline: Pipeline,
    history: Mutex<Vec<HistoryTurn>>,
    processing: AtomicBool,
    created_at: DateTime<Utc>,
    last_active: Mutex<DateTime<Utc>>,
    max_message_length: usize,
}

impl Session {
    /// Create a session, opening its history with the configured greeting.
    pub fn new(id: Uuid, pipeline: Pipeline, config: &ChatConfig) -> Self {
        let mut history = Vec::new();
        if !config.greeting.trim().is_empty() {
            history.push(HistoryTurn::assistant(config.greeting.clone()));
        }
        let now = Utc::now();
        Self {
            id,
            pipeline,
            history: Mutex::new(history),
            processing: AtomicBool::new(false),
            created_at: now,
            last_active: Mutex::new(now),
            max_message_length: config.max_message_length,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active.lock().map(|t| *t).unwrap_or(self.created_at)
    }

    pub fn state(&self) -> SessionState {
        if self.processing.load(Ordering::SeqCst) {
            SessionState::Processing
        } else {
            SessionState::Idle
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Snapshot of the conversation so far.
    pub fn history(&self) -> Vec<HistoryTurn> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// The greeting turn, if the session opened with one.
    pub fn greeting(&self) -> Option<String> {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.first().cloned())
            .filter(|t| t.role == placebot_core::types::Role::Assistant)
            .map(|t| t.text)
    }

    /// Idle for longer than `timeout`. A session answering a question
    /// never expires.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.state() == SessionState::Idle && Utc::now() - self.last_active() > timeout
    }

    /// Ask a question.
    ///
    /// Rejects empty or over-long input and questions arriving mid-turn
    /// without touching history. Otherwise both the question and the reply
    /// are appended, including replies for aborted turns.
    pub async fn submit(&self, question: &str) -> Result<TurnReply, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if question.chars().count() > self.max_message_length {
            return Err(ChatError::MessageTooLong(self.max_message_length));
        }

        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ChatError::TurnInProgress);
        }
        let _guard = ProcessingGuard(&self.processing);

        let prior = {
            let mut history = self.lock_history()?;
            let prior = history.clone();
            history.push(HistoryTurn::user(question));
            prior
        };
        self.touch();

        let outcome = AssertUnwindSafe(self.pipeline.handle_turn(question, &prior))
            .catch_unwind()
            .await;
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => self.abort_reply(err),
            Err(payload) => self.panic_reply(&*payload),
        };

        self.lock_history()?
            .push(HistoryTurn::assistant(reply.answer.clone()));
        self.touch();
        Ok(reply)
    }

    fn abort_reply(&self, err: ChatError) -> TurnReply {
        let (answer, status) = match &err {
            ChatError::Connection(msg) => {
                warn!(session_id = %self.id, error = %msg, "Turn aborted: database unreachable");
                (
                    format!("Could not reach the database: {}", msg),
                    TurnStatus::Aborted,
                )
            }
            ChatError::Service(msg) => {
                warn!(session_id = %self.id, error = %msg, "Turn aborted: completion service unavailable");
                (
                    format!("The language model service is unavailable: {}", msg),
                    TurnStatus::Aborted,
                )
            }
            other => {
                error!(session_id = %self.id, error = %other, "Turn failed");
                (GENERIC_FAILURE.to_string(), TurnStatus::Failed)
            }
        };
        TurnReply {
            answer,
            sql: None,
            status,
        }
    }

    fn panic_reply(&self, payload: &(dyn Any + Send)) -> TurnReply {
        let message = payload
            .downcast_ref::<&str>()
            .map(|m| m.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(session_id = %self.id, panic = %message, "Turn panicked");
        TurnReply {
            answer: GENERIC_FAILURE.to_string(),
            sql: None,
            status: TurnStatus::Failed,
        }
    }

    fn lock_history(&self) -> Result<std::sync::MutexGuard<'_, Vec<HistoryTurn>>, ChatError> {
        self.history
            .lock()
            .map_err(|e| ChatError::Internal(format!("history lock poisoned: {}", e)))
    }

    fn touch(&self) {
        if let Ok(mut t) = self.last_active.lock() {
            *t = Utc::now();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish()
    }
}

// =============================================================================
// SessionRegistry
// =============================================================================

/// Listing entry for a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub turns: usize,
    pub state: SessionState,
}

/// Opens the database connection for a new session.
pub type DatabaseOpener = Arc<dyn Fn() -> Result<Database, StorageError> + Send + Sync>;

/// All live sessions.
pub struct SessionRegistry {
    config: PlacebotConfig,
    service: Arc<dyn CompletionService>,
    opener: DatabaseOpener,
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    /// Registry whose sessions open `config.database.path`.
    pub fn new(config: PlacebotConfig, service: Arc<dyn CompletionService>) -> Self {
        let path = PathBuf::from(&config.database.path);
        let options = DatabaseOptions::from(&config.database);
        let opener: DatabaseOpener = Arc::new(move || Database::open(&path, options.clone()));
        Self::with_opener(config, service, opener)
    }

    pub fn with_opener(
        config: PlacebotConfig,
        service: Arc<dyn CompletionService>,
        opener: DatabaseOpener,
    ) -> Self {
        Self {
            config,
            service,
            opener,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PlacebotConfig {
        &self.config
    }

    /// Open a fresh session with its own connection.
    pub fn create(&self) -> Result<Arc<Session>, ChatError> {
        let db = (self.opener)().map_err(ChatError::from)?;
        let pipeline = Pipeline::new(Arc::new(db), Arc::clone(&self.service), &self.config);
        let session = Arc::new(Session::new(Uuid::new_v4(), pipeline, &self.config.chat));

        self.lock_sessions()?
            .insert(session.id(), Arc::clone(&session));
        info!(session_id = %session.id(), "Session created");
        Ok(session)
    }

    /// Describe the schema over a short-lived connection of its own.
    pub async fn schema(&self) -> Result<String, ChatError> {
        let db = Arc::new((self.opener)()?);
        let introspector = SchemaIntrospector::from_config(&self.config.database);
        let described = introspector.describe(&db).await;
        db.close();
        Ok(described?)
    }

    /// Look up a live session. Expired sessions are dropped on sight.
    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().ok()?;
        let session = sessions.get(&id)?;
        if session.is_expired(self.timeout()) {
            info!(session_id = %id, "Session expired");
            if let Some(expired) = sessions.remove(&id) {
                expired.pipeline().database().close();
            }
            return None;
        }
        Some(Arc::clone(session))
    }

    /// Reuse `requested` when it is live, otherwise open a new session.
    pub fn get_or_create(&self, requested: Option<Uuid>) -> Result<Arc<Session>, ChatError> {
        if let Some(id) = requested {
            if let Some(session) = self.get(id) {
                return Ok(session);
            }
        }
        self.create()
    }

    /// Summaries of live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        self.purge_expired();
        let sessions = match self.sessions.lock() {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        let mut out: Vec<SessionSummary> = sessions
            .values()
            .map(|s| SessionSummary {
                id: s.id(),
                created_at: s.created_at(),
                last_active: s.last_active(),
                turns: s.history().len(),
                state: s.state(),
            })
            .collect();
        out.sort_by_key(|s| s.created_at);
        out
    }

    /// History of a live session.
    pub fn history(&self, id: Uuid) -> Result<Vec<HistoryTurn>, ChatError> {
        self.get(id)
            .map(|s| s.history())
            .ok_or(ChatError::SessionNotFound(id))
    }

    /// Remove a session and close its connection.
    pub fn delete(&self, id: Uuid) -> Result<(), ChatError> {
        let removed = self.lock_sessions()?.remove(&id);
        match removed {
            Some(session) => {
                session.pipeline().database().close();
                info!(session_id = %id, "Session deleted");
                Ok(())
            }
            None => Err(ChatError::SessionNotFound(id)),
        }
    }

    /// Drop every expired session; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let timeout = self.timeout();
        let mut sessions = match self.sessions.lock() {
            Ok(s) => s,
            Err(_) => return 0,
        };
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(timeout))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                session.pipeline().database().close();
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired sessions purged");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.config.chat.session_timeout_minutes))
    }

    fn lock_sessions(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Arc<Session>>>, ChatError> {
        self.sessions
            .lock()
            .map_err(|e| ChatError::Internal(format!("session lock poisoned: {}", e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
