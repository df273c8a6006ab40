//! End-to-end lifecycle coordination: the rule engine persists, the
//! dispatcher raises an event, and the transaction listener closes the
//! window. The persister itself never commits or rolls back on its own.

use std::sync::Arc;

use waypoint_core::{
    EventKind, HistoryEntry, LifecycleDispatcher, LifecycleEvent, WorkflowInstance,
};
use waypoint_storage::{Persister, PersisterRegistry, TransactionListener};
use waypoint_storage_sql::{SqlPersister, SqlPersisterConfig};

struct Harness {
    persister: Arc<SqlPersister>,
    dispatcher: LifecycleDispatcher,
}

async fn harness() -> Harness {
    let config = SqlPersisterConfig::new("sqlite::memory:").autocommit(false);
    let persister = Arc::new(SqlPersister::connect(config).await.expect("connect"));
    persister.ensure_schema().await.expect("schema");

    let registry = Arc::new(PersisterRegistry::new());
    registry.register("ticket", persister.clone());
    let dispatcher = LifecycleDispatcher::new();
    dispatcher.register("ticket", Arc::new(TransactionListener::new(registry)));

    Harness {
        persister,
        dispatcher,
    }
}

fn ticket() -> WorkflowInstance {
    WorkflowInstance::new("ticket", "NEW", chrono_tz::UTC)
}

#[tokio::test]
async fn successful_action_commits_instance_and_history() {
    let h = harness().await;
    let mut wf = ticket();

    // Action executed successfully: the engine persists, then raises save.
    let id = h.persister.create_instance(&mut wf).await.unwrap();
    let mut entries = vec![HistoryEntry::for_transition(&wf, "create", "opened", "alice").unwrap()];
    h.persister.create_history(&wf, &mut entries).await.unwrap();

    let event = LifecycleEvent::new(EventKind::Save, &wf, "NEW");
    h.dispatcher.dispatch(&event).await.unwrap();

    // A later rollback must not touch the committed cycle.
    h.persister.rollback().await.unwrap();
    let fetched = h.persister.fetch_instance(&id).await.unwrap().unwrap();
    assert_eq!(fetched.state, "NEW");
    assert_eq!(h.persister.fetch_history(&wf).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_action_triggers_rollback_not_commit() {
    let h = harness().await;
    let mut wf = ticket();

    // Cycle 1 succeeds and commits.
    let id = h.persister.create_instance(&mut wf).await.unwrap();
    let save = LifecycleEvent::new(EventKind::Save, &wf, "NEW");
    h.dispatcher.dispatch(&save).await.unwrap();

    // Cycle 2: the action's writes land, then the action fails; the engine
    // raises rollback and commit is never called for this cycle.
    wf.set_state("IN_PROGRESS");
    h.persister.update_instance(&mut wf).await.unwrap();
    let mut entries = vec![HistoryEntry::for_transition(&wf, "start", "working", "bob").unwrap()];
    h.persister.create_history(&wf, &mut entries).await.unwrap();

    let rollback = LifecycleEvent::new(EventKind::Rollback, &wf, "IN_PROGRESS");
    h.dispatcher.dispatch(&rollback).await.unwrap();

    // Storage still shows cycle 1 only.
    let fetched = h.persister.fetch_instance(&id).await.unwrap().unwrap();
    assert_eq!(fetched.state, "NEW");
    assert!(h.persister.fetch_history(&wf).await.unwrap().is_empty());
}

#[tokio::test]
async fn engine_defined_event_kinds_pass_through() {
    let h = harness().await;
    let mut wf = ticket();
    let id = h.persister.create_instance(&mut wf).await.unwrap();

    // An event kind this subsystem does not recognize leaves the open
    // window alone.
    let event = LifecycleEvent::new(EventKind::Other("execute".to_string()), &wf, "NEW");
    h.dispatcher.dispatch(&event).await.unwrap();

    h.persister.rollback().await.unwrap();
    assert!(h.persister.fetch_instance(&id).await.unwrap().is_none());
}
