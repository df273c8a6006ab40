use std::future::Future;

use super::{entry_at, ticket, TestResult, TransactionMode};
use crate::persister::Persister;

pub(super) async fn run_history_tests<P, F, Fut>(factory: &F) -> Vec<TestResult>
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "history",
        "fetch_history_empty_is_ok",
        fetch_history_empty_is_ok(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "create_history_marks_entries_saved",
        create_history_marks_entries_saved(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "history_most_recent_first",
        history_most_recent_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "resave_skips_saved_entries",
        resave_skips_saved_entries(factory).await,
    ));
    results.push(TestResult::from_result(
        "history",
        "fetched_entries_carry_provenance_fields",
        fetched_entries_carry_provenance_fields(factory).await,
    ));

    results
}

async fn fetch_history_empty_is_ok<P, F, Fut>(factory: &F) -> Result<(), String>
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

    let entries = persister
        .fetch_history(&wf)
        .await
        .map_err(|e| format!("empty history fetch must not fail: {}", e))?;
    if !entries.is_empty() {
        return Err(format!("expected no entries, got {}", entries.len()));
    }
    Ok(())
}

async fn create_history_marks_entries_saved<P, F, Fut>(factory: &F) -> Result<(), String>
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

    let mut entries = vec![entry_at(&id, "create", 9), entry_at(&id, "start", 10)];
    persister
        .create_history(&wf, &mut entries)
        .await
        .map_err(|e| format!("create_history failed: {}", e))?;

    for entry in &entries {
        if !entry.is_saved() {
            return Err(format!("entry `{}` not marked saved", entry.action()));
        }
        if entry.id().is_none() {
            return Err(format!("entry `{}` got no identifier", entry.action()));
        }
    }
    if entries[0].id() == entries[1].id() {
        return Err("entries share an identifier".to_string());
    }
    Ok(())
}

async fn history_most_recent_first<P, F, Fut>(factory: &F) -> Result<(), String>
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

    // Inserted out of chronological order on purpose.
    let mut entries = vec![
        entry_at(&id, "second", 11),
        entry_at(&id, "third", 12),
        entry_at(&id, "first", 10),
    ];
    persister
        .create_history(&wf, &mut entries)
        .await
        .map_err(|e| format!("create_history failed: {}", e))?;

    let fetched = persister
        .fetch_history(&wf)
        .await
        .map_err(|e| format!("fetch_history failed: {}", e))?;
    let actions: Vec<&str> = fetched.iter().map(|e| e.action()).collect();
    if actions != ["third", "second", "first"] {
        return Err(format!("expected most-recent-first order, got {:?}", actions));
    }
    for pair in fetched.windows(2) {
        if pair[0].date() <= pair[1].date() {
            return Err(format!(
                "timestamps not strictly descending: {} then {}",
                pair[0].date(),
                pair[1].date()
            ));
        }
    }
    Ok(())
}

async fn resave_skips_saved_entries<P, F, Fut>(factory: &F) -> Result<(), String>
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

    let mut entries = vec![entry_at(&id, "create", 9), entry_at(&id, "start", 10)];
    persister
        .create_history(&wf, &mut entries)
        .await
        .map_err(|e| format!("first create_history failed: {}", e))?;
    let first_ids: Vec<_> = entries.iter().map(|e| e.id().cloned()).collect();

    // Overlapping batch: two already-saved entries plus one new.
    entries.push(entry_at(&id, "approve", 11));
    persister
        .create_history(&wf, &mut entries)
        .await
        .map_err(|e| format!("second create_history failed: {}", e))?;

    let saved_ids: Vec<_> = entries.iter().map(|e| e.id().cloned()).collect();
    if saved_ids[..2] != first_ids[..] {
        return Err("re-save reassigned identifiers of saved entries".to_string());
    }

    let fetched = persister
        .fetch_history(&wf)
        .await
        .map_err(|e| format!("fetch_history failed: {}", e))?;
    if fetched.len() != 3 {
        return Err(format!(
            "expected 3 rows after idempotent re-save, got {}",
            fetched.len()
        ));
    }
    Ok(())
}

async fn fetched_entries_carry_provenance_fields<P, F, Fut>(factory: &F) -> Result<(), String>
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

    let mut entries = vec![entry_at(&id, "approve", 14)];
    persister
        .create_history(&wf, &mut entries)
        .await
        .map_err(|e| format!("create_history failed: {}", e))?;

    let fetched = persister
        .fetch_history(&wf)
        .await
        .map_err(|e| format!("fetch_history failed: {}", e))?;
    let entry = fetched.first().ok_or("no entries fetched")?;

    if !entry.is_saved() {
        return Err("fetched entry must be saved".to_string());
    }
    if entry.workflow_id() != &id {
        return Err("fetched entry references the wrong workflow".to_string());
    }
    if entry.action() != "approve"
        || entry.description() != "approve executed"
        || entry.state() != "NEW"
        || entry.user() != "testuser"
    {
        return Err(format!(
            "provenance fields lost in roundtrip: action={} description={} state={} user={}",
            entry.action(),
            entry.description(),
            entry.state(),
            entry.user()
        ));
    }
    if entry.date() != entries[0].date() {
        return Err(format!(
            "timestamp changed in roundtrip: stored {}, fetched {}",
            entries[0].date(),
            entry.date()
        ));
    }
    Ok(())
}
