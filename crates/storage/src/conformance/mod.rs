//! Conformance test suite for [`Persister`] implementations.
//!
//! A backend-agnostic suite that any persister can run to verify the
//! storage contract. The suite covers:
//!
//! - **Roundtrip**: identifier allocation, create-then-fetch, the
//!   not-found sentinel, updates
//! - **History**: saved-flag handling, descending timestamp order,
//!   idempotent re-save, provenance field fidelity
//! - **Transaction**: commit durability, rollback discard, autocommit
//!   no-op semantics
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory that
//! creates a fresh, empty persister in the requested [`TransactionMode`]:
//!
//! ```ignore
//! use waypoint_storage::conformance::run_conformance_suite;
//! use waypoint_storage::MemoryPersister;
//!
//! #[tokio::test]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|mode| async move {
//!         match mode {
//!             TransactionMode::AutoCommit => MemoryPersister::new(),
//!             TransactionMode::Explicit => MemoryPersister::transactional(),
//!         }
//!     })
//!     .await;
//!     assert_eq!(report.failed, 0, "{report}");
//! }
//! ```

mod history;
mod roundtrip;
mod transaction;

use std::fmt;
use std::future::Future;

use chrono::{NaiveDate, NaiveDateTime};

use waypoint_core::{HistoryEntry, RecordId, WorkflowInstance};

use crate::persister::Persister;

/// Durability mode the factory should configure the persister with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Every write is implicitly its own transaction.
    AutoCommit,
    /// Writes stay pending until an explicit commit.
    Explicit,
}

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "roundtrip", "history", "transaction").
    pub category: String,
    /// Test name (e.g. "create_then_fetch_returns_written_state").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a persister backend.
///
/// The `factory` is called once per test with the transaction mode that
/// test needs, and must return a fresh, empty persister each time.
pub async fn run_conformance_suite<P, F, Fut>(factory: F) -> ConformanceReport
where
    P: Persister,
    F: Fn(TransactionMode) -> Fut,
    Fut: Future<Output = P>,
{
    let mut results = Vec::new();

    results.extend(roundtrip::run_roundtrip_tests(&factory).await);
    results.extend(history::run_history_tests(&factory).await);
    results.extend(transaction::run_transaction_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: fixtures with sensible defaults ─────────────────────────────────

fn ticket() -> WorkflowInstance {
    WorkflowInstance::new("ticket", "NEW", chrono_tz::UTC)
}

fn stamp(hour: u32, minute: u32) -> NaiveDateTime {
    // Fixed calendar day; tests vary hours so minute-precision backends
    // still observe distinct timestamps.
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .unwrap_or_default()
}

fn entry_at(workflow_id: &RecordId, action: &str, hour: u32) -> HistoryEntry {
    HistoryEntry::new(
        workflow_id.clone(),
        action,
        format!("{} executed", action),
        "NEW",
        "testuser",
        stamp(hour, 0),
    )
}
