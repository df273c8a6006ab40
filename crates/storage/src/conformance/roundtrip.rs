use std::future::Future;

use waypoint_core::RecordId;

use super::{ticket, TestResult, TransactionMode};
use crate::error::PersistenceError;
use crate::persister::Persister;

pub(super) async fn run_roundtrip_tests<P, F, Fut>(factory: &F) -> Vec<TestResult>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "roundtrip",
        "create_assigns_identifier",
        create_assigns_identifier(factory).await,
    ));
    results.push(TestResult::from_result(
        "roundtrip",
        "create_then_fetch_returns_written_state",
        create_then_fetch_returns_written_state(factory).await,
    ));
    results.push(TestResult::from_result(
        "roundtrip",
        "fetch_unknown_id_returns_none",
        fetch_unknown_id_returns_none(factory).await,
    ));
    results.push(TestResult::from_result(
        "roundtrip",
        "update_overwrites_state",
        update_overwrites_state(factory).await,
    ));
    results.push(TestResult::from_result(
        "roundtrip",
        "update_without_identifier_fails",
        update_without_identifier_fails(factory).await,
    ));
    results.push(TestResult::from_result(
        "roundtrip",
        "create_on_persisted_instance_fails",
        create_on_persisted_instance_fails(factory).await,
    ));

    results
}

async fn create_assigns_identifier<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::AutoCommit).await;
    let mut wf = ticket();

    let id = persister
        .create_instance(&mut wf)
        .await
        .map_err(|e| format!("create failed: {}", e))?;

    if wf.id() != Some(&id) {
        return Err(format!(
            "instance id {:?} does not match returned id {}",
            wf.id(),
            id
        ));
    }
    if wf.last_update().is_none() {
        return Err("create did not populate last_update".to_string());
    }
    Ok(())
}

async fn create_then_fetch_returns_written_state<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::AutoCommit).await;
    let mut wf = ticket();
    let id = persister
        .create_instance(&mut wf)
        .await
        .map_err(|e| format!("create failed: {}", e))?;

    let fetched = persister
        .fetch_instance(&id)
        .await
        .map_err(|e| format!("fetch failed: {}", e))?
        .ok_or("fetch returned none for a created instance")?;

    if fetched.state != "NEW" {
        return Err(format!("expected state NEW, got {}", fetched.state));
    }
    if Some(fetched.last_update) != wf.last_update() {
        return Err(format!(
            "fetched last_update {} does not match instance {:?}",
            fetched.last_update,
            wf.last_update()
        ));
    }
    Ok(())
}

async fn fetch_unknown_id_returns_none<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::AutoCommit).await;
    match persister.fetch_instance(&RecordId::Int(999_999)).await {
        Ok(None) => Ok(()),
        Ok(Some(state)) => Err(format!("expected none, got state {}", state.state)),
        Err(e) => Err(format!("not-found must be a sentinel, not an error: {}", e)),
    }
}

async fn update_overwrites_state<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::AutoCommit).await;
    let mut wf = ticket();
    let id = persister
        .create_instance(&mut wf)
        .await
        .map_err(|e| format!("create failed: {}", e))?;

    wf.set_state("IN_PROGRESS");
    persister
        .update_instance(&mut wf)
        .await
        .map_err(|e| format!("update failed: {}", e))?;

    let fetched = persister
        .fetch_instance(&id)
        .await
        .map_err(|e| format!("fetch failed: {}", e))?
        .ok_or("fetch returned none after update")?;
    if fetched.state != "IN_PROGRESS" {
        return Err(format!("expected IN_PROGRESS, got {}", fetched.state));
    }
    Ok(())
}

async fn update_without_identifier_fails<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::AutoCommit).await;
    let mut wf = ticket();
    match persister.update_instance(&mut wf).await {
        Err(PersistenceError::UnsavedInstance) => Ok(()),
        Err(other) => Err(format!("expected UnsavedInstance, got {}", other)),
        Ok(()) => Err("update of an unsaved instance must fail".to_string()),
    }
}

async fn create_on_persisted_instance_fails<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::AutoCommit).await;
    let mut wf = ticket();
    persister
        .create_instance(&mut wf)
        .await
        .map_err(|e| format!("create failed: {}", e))?;

    match persister.create_instance(&mut wf).await {
        Err(PersistenceError::AlreadyPersisted { .. }) => Ok(()),
        Err(other) => Err(format!("expected AlreadyPersisted, got {}", other)),
        Ok(_) => Err("second create must fail".to_string()),
    }
}
