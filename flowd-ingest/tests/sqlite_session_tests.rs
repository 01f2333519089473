//! SqliteSession integration tests
//!
//! Exercises the real session implementation against a temporary database:
//! state transitions, commit/rollback visibility, and upsert semantics.

use flowd_ingest::commit::{
    SessionFactory, SessionState, SessionWrite, SqliteSessionFactory, StorageSession,
};
use flowd_ingest::models::{ParseWarning, TaskDefinition, WarningCode, WorkflowDefinition};
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn open_pool(temp: &TempDir) -> SqlitePool {
    let db_path = temp.path().join("flowd.db");
    flowd_common::db::init_database(&db_path).await.unwrap()
}

fn workflow(id: &str, tasks: usize) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: format!("Workflow {}", id),
        fileloc: format!("{}.json", id),
        tasks: (0..tasks)
            .map(|i| TaskDefinition {
                id: format!("t{}", i),
                kind: "noop".to_string(),
                depends_on: vec![],
            })
            .collect(),
    }
}

#[tokio::test]
async fn execute_transitions_clean_to_dirty_and_commit_persists() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let factory = SqliteSessionFactory::new(pool.clone());

    let mut session = factory.open_session().await.unwrap();
    assert_eq!(session.state(), SessionState::Clean);

    session
        .execute(SessionWrite::UpsertWorkflow(workflow("wf-1", 2)))
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Dirty);

    session.flush().await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(session.state(), SessionState::Clean);

    let (name, task_count): (String, i64) =
        sqlx::query_as("SELECT name, task_count FROM workflows WHERE workflow_id = 'wf-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "Workflow wf-1");
    assert_eq!(task_count, 2);
}

#[tokio::test]
async fn rollback_discards_pending_writes() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let factory = SqliteSessionFactory::new(pool.clone());

    let mut session = factory.open_session().await.unwrap();
    session
        .execute(SessionWrite::RecordImportError {
            fileloc: "broken.json".to_string(),
            message: "Parse failed".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Dirty);

    session.rollback().await.unwrap();
    assert_eq!(session.state(), SessionState::Clean);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_errors")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn rollback_from_clean_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let mut session = SqliteSessionFactory::new(pool)
        .open_session()
        .await
        .unwrap();

    session.rollback().await.unwrap();
    assert_eq!(session.state(), SessionState::Clean);
}

#[tokio::test]
async fn workflow_upsert_is_idempotent_across_batches() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let factory = SqliteSessionFactory::new(pool.clone());

    for tasks in [1, 3] {
        let mut session = factory.open_session().await.unwrap();
        session
            .execute(SessionWrite::UpsertWorkflow(workflow("wf-dup", tasks)))
            .await
            .unwrap();
        session.commit().await.unwrap();
    }

    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT workflow_id, task_count FROM workflows")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, 3);
}

#[tokio::test]
async fn clear_import_errors_removes_recorded_rows() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let factory = SqliteSessionFactory::new(pool.clone());

    let mut session = factory.open_session().await.unwrap();
    for fileloc in ["a.json", "b.json"] {
        session
            .execute(SessionWrite::RecordImportError {
                fileloc: fileloc.to_string(),
                message: "Parse failed".to_string(),
            })
            .await
            .unwrap();
    }
    session.commit().await.unwrap();

    let mut session = factory.open_session().await.unwrap();
    session
        .execute(SessionWrite::ClearImportErrors {
            filelocs: vec!["a.json".to_string()],
        })
        .await
        .unwrap();
    session.commit().await.unwrap();

    let remaining: Vec<(String,)> = sqlx::query_as("SELECT fileloc FROM import_errors")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, "b.json");
}

#[tokio::test]
async fn stale_warnings_are_purged_keeping_current_codes() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let factory = SqliteSessionFactory::new(pool.clone());

    let mut session = factory.open_session().await.unwrap();
    for code in [WarningCode::EmptyWorkflow, WarningCode::DuplicateTaskId] {
        session
            .execute(SessionWrite::RecordWarning {
                workflow_id: "wf-w".to_string(),
                warning: ParseWarning {
                    code,
                    message: "detail".to_string(),
                },
            })
            .await
            .unwrap();
    }
    session.commit().await.unwrap();

    // Next scan only reports the duplicate-task warning
    let mut session = factory.open_session().await.unwrap();
    session
        .execute(SessionWrite::PurgeStaleWarnings {
            workflow_id: "wf-w".to_string(),
            keep_codes: vec![WarningCode::DuplicateTaskId],
        })
        .await
        .unwrap();
    session.commit().await.unwrap();

    let codes: Vec<(String,)> =
        sqlx::query_as("SELECT code FROM workflow_warnings WHERE workflow_id = 'wf-w'")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(codes.len(), 1);
    assert_eq!(codes[0].0, "duplicate_task_id");
}

#[tokio::test]
async fn abort_step_discards_only_that_steps_writes() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let factory = SqliteSessionFactory::new(pool.clone());

    let mut session = factory.open_session().await.unwrap();

    session.begin_step().await.unwrap();
    session
        .execute(SessionWrite::RecordImportError {
            fileloc: "kept.json".to_string(),
            message: "Parse failed".to_string(),
        })
        .await
        .unwrap();
    session.complete_step().await.unwrap();

    session.begin_step().await.unwrap();
    session
        .execute(SessionWrite::RecordImportError {
            fileloc: "discarded.json".to_string(),
            message: "Parse failed".to_string(),
        })
        .await
        .unwrap();
    session.abort_step().await.unwrap();

    // The first step's write is still pending
    assert_eq!(session.state(), SessionState::Dirty);
    session.commit().await.unwrap();

    let rows: Vec<(String,)> = sqlx::query_as("SELECT fileloc FROM import_errors")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "kept.json");
}

#[tokio::test]
async fn abort_step_with_no_prior_writes_restores_clean() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let mut session = SqliteSessionFactory::new(pool)
        .open_session()
        .await
        .unwrap();

    session.begin_step().await.unwrap();
    session
        .execute(SessionWrite::RecordImportError {
            fileloc: "gone.json".to_string(),
            message: "Parse failed".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Dirty);

    session.abort_step().await.unwrap();
    assert_eq!(session.state(), SessionState::Clean);
}

#[tokio::test]
async fn commit_with_no_writes_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let pool = open_pool(&temp).await;
    let mut session = SqliteSessionFactory::new(pool)
        .open_session()
        .await
        .unwrap();

    session.flush().await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(session.state(), SessionState::Clean);
}
