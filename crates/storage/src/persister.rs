use async_trait::async_trait;
use chrono::NaiveDateTime;

use waypoint_core::{HistoryEntry, RecordId, WorkflowInstance};

use crate::error::PersistenceError;

/// The persisted view of an instance, as returned by a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState {
    pub state: String,
    pub last_update: NaiveDateTime,
}

/// Durable create/read/update of workflow instances and their history, plus
/// transaction boundary control.
///
/// ## Transaction semantics
///
/// A persister is constructed in one of two durability modes. Under
/// autocommit (the default) every write is implicitly its own transaction
/// and `commit`/`rollback` are no-ops. With autocommit off, the first write
/// after the previous commit/rollback opens a transaction window that stays
/// open — possibly across several logical operations (instance update plus
/// history inserts) — until `commit` or `rollback` closes it. The persister
/// never closes the window itself; that is the job of the transaction
/// listener reacting to a lifecycle event.
///
/// Fetches issued through a persister with an open window observe that
/// window's uncommitted writes (a persister exclusively owns one storage
/// connection).
///
/// ## Ordering
///
/// Operations on one persister are strictly ordered by call order: no
/// reordering, no batching across calls, no internal concurrency. Callers
/// needing parallelism use independent persister instances.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Persist a new instance, allocating its identifier.
    ///
    /// Populates the instance's id and `last_update` and returns the id.
    /// Fails with [`PersistenceError::AlreadyPersisted`] if the instance
    /// already has an identifier.
    async fn create_instance(
        &self,
        workflow: &mut WorkflowInstance,
    ) -> Result<RecordId, PersistenceError>;

    /// Look up an instance's persisted state by id.
    ///
    /// `None` is the not-found sentinel — zero matching rows is a valid,
    /// non-error outcome. Errors are reserved for storage failures.
    async fn fetch_instance(
        &self,
        id: &RecordId,
    ) -> Result<Option<InstanceState>, PersistenceError>;

    /// Write the instance's current state with a timestamp computed at call
    /// time (never supplied by the caller).
    async fn update_instance(
        &self,
        workflow: &mut WorkflowInstance,
    ) -> Result<(), PersistenceError>;

    /// Persist every entry not yet saved, allocating an identifier and
    /// marking each as saved. Entries already saved are left untouched, so
    /// re-invoking with an overlapping set is idempotent. A failure on one
    /// entry aborts processing of the remaining entries.
    async fn create_history(
        &self,
        workflow: &WorkflowInstance,
        entries: &mut [HistoryEntry],
    ) -> Result<(), PersistenceError>;

    /// All history rows for the instance, ordered by timestamp descending
    /// (most recent first). Fetched entries are saved. An empty result is a
    /// valid outcome.
    async fn fetch_history(
        &self,
        workflow: &WorkflowInstance,
    ) -> Result<Vec<HistoryEntry>, PersistenceError>;

    /// Make the open transaction window durable. No-op under autocommit.
    async fn commit(&self) -> Result<(), PersistenceError>;

    /// Discard the open transaction window. Under autocommit there is
    /// nothing to undo; implementations warn and return Ok.
    async fn rollback(&self) -> Result<(), PersistenceError>;
}
