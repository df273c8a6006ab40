use std::future::Future;

use super::{entry_at, ticket, TestResult, TransactionMode};
use crate::persister::Persister;

pub(super) async fn run_transaction_tests<P, F, Fut>(factory: &F) -> Vec<TestResult>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "transaction",
        "rollback_discards_uncommitted_create",
        rollback_discards_uncommitted_create(factory).await,
    ));
    results.push(TestResult::from_result(
        "transaction",
        "commit_makes_create_durable",
        commit_makes_create_durable(factory).await,
    ));
    results.push(TestResult::from_result(
        "transaction",
        "rollback_reverts_update_to_committed_state",
        rollback_reverts_update_to_committed_state(factory).await,
    ));
    results.push(TestResult::from_result(
        "transaction",
        "rollback_discards_uncommitted_history",
        rollback_discards_uncommitted_history(factory).await,
    ));
    results.push(TestResult::from_result(
        "transaction",
        "commit_without_pending_writes_is_ok",
        commit_without_pending_writes_is_ok(factory).await,
    ));
    results.push(TestResult::from_result(
        "transaction",
        "autocommit_commit_is_noop",
        autocommit_commit_is_noop(factory).await,
    ));
    results.push(TestResult::from_result(
        "transaction",
        "autocommit_rollback_is_noop",
        autocommit_rollback_is_noop(factory).await,
    ));

    results
}

async fn rollback_discards_uncommitted_create<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::Explicit).await;
    let mut wf = ticket();
    let id = persister
        .create_instance(&mut wf)
        .await
        .map_err(|e| format!("create failed: {}", e))?;

    // Uncommitted writes are visible through the same persister.
    if persister
        .fetch_instance(&id)
        .await
        .map_err(|e| format!("fetch failed: {}", e))?
        .is_none()
    {
        return Err("open window must observe its own writes".to_string());
    }

    persister
        .rollback()
        .await
        .map_err(|e| format!("rollback failed: {}", e))?;

    match persister.fetch_instance(&id).await {
        Ok(None) => Ok(()),
        Ok(Some(_)) => Err("rolled-back create still visible".to_string()),
        Err(e) => Err(format!("fetch after rollback failed: {}", e)),
    }
}

async fn commit_makes_create_durable<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::Explicit).await;
    let mut wf = ticket();
    let id = persister
        .create_instance(&mut wf)
        .await
        .map_err(|e| format!("create failed: {}", e))?;

    persister
        .commit()
        .await
        .map_err(|e| format!("commit failed: {}", e))?;
    persister
        .rollback()
        .await
        .map_err(|e| format!("rollback failed: {}", e))?;

    match persister.fetch_instance(&id).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err("committed create lost after a later rollback".to_string()),
        Err(e) => Err(format!("fetch failed: {}", e)),
    }
}

async fn rollback_reverts_update_to_committed_state<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::Explicit).await;
    let mut wf = ticket();
    let id = persister
        .create_instance(&mut wf)
        .await
        .map_err(|e| format!("create failed: {}", e))?;
    persister
        .commit()
        .await
        .map_err(|e| format!("commit failed: {}", e))?;

    wf.set_state("IN_PROGRESS");
    persister
        .update_instance(&mut wf)
        .await
        .map_err(|e| format!("update failed: {}", e))?;
    persister
        .rollback()
        .await
        .map_err(|e| format!("rollback failed: {}", e))?;

    let fetched = persister
        .fetch_instance(&id)
        .await
        .map_err(|e| format!("fetch failed: {}", e))?
        .ok_or("committed row missing after rollback")?;
    if fetched.state != "NEW" {
        return Err(format!(
            "expected rollback to revert to NEW, got {}",
            fetched.state
        ));
    }
    Ok(())
}

async fn rollback_discards_uncommitted_history<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::Explicit).await;
    let mut wf = ticket();
    let id = persister
        .create_instance(&mut wf)
        .await
        .map_err(|e| format!("create failed: {}", e))?;
    persister
        .commit()
        .await
        .map_err(|e| format!("commit failed: {}", e))?;

    let mut entries = vec![entry_at(&id, "start", 10)];
    persister
        .create_history(&wf, &mut entries)
        .await
        .map_err(|e| format!("create_history failed: {}", e))?;
    persister
        .rollback()
        .await
        .map_err(|e| format!("rollback failed: {}", e))?;

    let fetched = persister
        .fetch_history(&wf)
        .await
        .map_err(|e| format!("fetch_history failed: {}", e))?;
    if !fetched.is_empty() {
        return Err(format!(
            "rolled-back history still visible ({} rows)",
            fetched.len()
        ));
    }
    Ok(())
}

async fn commit_without_pending_writes_is_ok<P, F, Fut>(factory: &F) -> Result<(), String>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let persister = factory(TransactionMode::Explicit).await;
    persister
        .commit()
        .await
        .map_err(|e| format!("commit with no window open must succeed: {}", e))
}

async fn autocommit_commit_is_noop<P, F, Fut>(factory: &F) -> Result<(), String>
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

    persister
        .commit()
        .await
        .map_err(|e| format!("autocommit commit must be a silent no-op: {}", e))?;

    match persister.fetch_instance(&id).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err("row vanished after no-op commit".to_string()),
        Err(e) => Err(format!("fetch failed: {}", e)),
    }
}

async fn autocommit_rollback_is_noop<P, F, Fut>(factory: &F) -> Result<(), String>
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

    // Every write was already its own transaction, so rollback has nothing
    // to undo: it must succeed and discard nothing.
    persister
        .rollback()
        .await
        .map_err(|e| format!("autocommit rollback must not fail: {}", e))?;

    match persister.fetch_instance(&id).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err("autocommit rollback undid a durable write".to_string()),
        Err(e) => Err(format!("fetch failed: {}", e)),
    }
}
