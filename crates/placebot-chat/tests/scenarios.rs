//! End-to-end conversation scenarios against an in-memory placement
//! database and a scripted completion service.

use std::sync::Arc;

use placebot_chat::{ChatError, SessionRegistry, SessionState, TurnStatus};
use placebot_core::config::PlacebotConfig;
use placebot_core::types::Role;
use placebot_llm::MockCompletion;
use placebot_storage::{seed_demo_data, Database, DatabaseOptions, StorageError};

/// Demo data with one placement moved from Placed to Pending, leaving
/// three placed students.
fn three_placed_registry(mock: Arc<MockCompletion>) -> SessionRegistry {
    SessionRegistry::with_opener(
        PlacebotConfig::default(),
        mock,
        Arc::new(|| -> Result<Database, StorageError> {
            let db = Database::in_memory(DatabaseOptions::default())?;
            db.with_conn(|conn| {
                seed_demo_data(conn)?;
                conn.execute(
                    "UPDATE placements SET status = 'Pending' WHERE placement_id = 5",
                    [],
                )
                .map_err(|e| StorageError::Internal(e.to_string()))?;
                Ok(())
            })?;
            Ok(db)
        }),
    )
}

#[tokio::test]
async fn test_count_of_placed_students() {
    let mock = Arc::new(MockCompletion::always(
        "SELECT COUNT(*) FROM placements WHERE status = 'Placed';",
    ));
    let registry = three_placed_registry(mock.clone());
    let session = registry.create().unwrap();

    let reply = session
        .submit("How many students have been placed?")
        .await
        .unwrap();

    assert_eq!(reply.answer, "3");
    assert_eq!(reply.status, TurnStatus::Answered);
    assert_eq!(mock.calls(), 1);

    let history = session.history();
    assert_eq!(history.last().unwrap().role, Role::Assistant);
    assert_eq!(history.last().unwrap().text, "3");
}

#[tokio::test]
async fn test_empty_result_answer() {
    let mock = Arc::new(MockCompletion::always(
        "```sql\nSELECT name FROM companies WHERE eligibility_cgpa > 9.5;\n```",
    ));
    let registry = three_placed_registry(mock);
    let session = registry.create().unwrap();

    let reply = session
        .submit("Which companies need a CGPA above 9.5?")
        .await
        .unwrap();
    assert_eq!(reply.answer, "No results found.");
    assert_eq!(reply.status, TurnStatus::Answered);
}

#[tokio::test]
async fn test_unknown_column_then_recovery() {
    let mock = Arc::new(MockCompletion::scripted([
        "SELECT placement_date FROM placements;",
        "SELECT COUNT(*) FROM companies;",
    ]));
    let registry = three_placed_registry(mock.clone());
    let session = registry.create().unwrap();

    let reply = session.submit("When did placements happen?").await.unwrap();
    assert_eq!(reply.status, TurnStatus::ExecutionError);
    assert!(reply
        .answer
        .starts_with("An error occurred while executing the query: "));
    assert!(reply.answer.contains("placement_date"));
    assert_eq!(session.history().len(), 3);
    assert_eq!(session.state(), SessionState::Idle);

    let reply = session.submit("How many companies are there?").await.unwrap();
    assert_eq!(reply.answer, "5");
    assert_eq!(session.history().len(), 5);

    // The failed turn is part of the second prompt's history.
    let prompt = mock.last_request().unwrap().prompt;
    let parts = placebot_chat::decompose(&prompt).unwrap();
    assert_eq!(parts.history.len(), 3);
    assert!(parts.history[2].1.contains("placement_date"));
}

#[tokio::test]
async fn test_lost_connection_aborts_without_completion() {
    let mock = Arc::new(MockCompletion::always("SELECT 1;"));
    let registry = three_placed_registry(mock.clone());
    let session = registry.create().unwrap();
    session.pipeline().database().close();

    let reply = session.submit("How many students?").await.unwrap();
    assert_eq!(reply.status, TurnStatus::Aborted);
    assert!(reply.answer.starts_with("Could not reach the database"));
    assert_eq!(mock.calls(), 0);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_write_statement_is_refused() {
    let mock = Arc::new(MockCompletion::scripted([
        "DELETE FROM students;",
        "SELECT COUNT(*) FROM students;",
    ]));
    let registry = three_placed_registry(mock);
    let session = registry.create().unwrap();

    let reply = session.submit("Remove everyone").await.unwrap();
    assert_eq!(reply.status, TurnStatus::ExecutionError);
    assert!(reply.answer.contains("DELETE statements are not allowed"));

    let reply = session.submit("How many students?").await.unwrap();
    assert_eq!(reply.answer, "6");
}

#[tokio::test]
async fn test_empty_question_leaves_session_untouched() {
    let mock = Arc::new(MockCompletion::always("SELECT 1;"));
    let registry = three_placed_registry(mock.clone());
    let session = registry.create().unwrap();

    assert!(matches!(
        session.submit("   ").await,
        Err(ChatError::EmptyMessage)
    ));
    assert_eq!(session.history().len(), 1);
    assert_eq!(mock.calls(), 0);
}
