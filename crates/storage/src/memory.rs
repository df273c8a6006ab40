//! In-memory persister, the reference backend.
//!
//! Backs the conformance suite and doubles as a test stand-in where a real
//! database is unwanted. Identifiers are allocated from monotonic counters
//! (they advance even across rollbacks, like a database sequence). In
//! explicit-transaction mode, writes land in a pending overlay that reads
//! consult first; commit merges the overlay into the committed store and
//! rollback discards it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use waypoint_core::{HistoryEntry, RecordId, WorkflowInstance};

use crate::error::PersistenceError;
use crate::persister::{InstanceState, Persister};

#[derive(Debug, Clone)]
struct InstanceRow {
    state: String,
    last_update: NaiveDateTime,
}

#[derive(Debug, Default)]
struct Rows {
    instances: HashMap<RecordId, InstanceRow>,
    history: Vec<HistoryEntry>,
}

#[derive(Debug)]
struct MemoryState {
    committed: Rows,
    pending: Rows,
    next_instance_id: i64,
    next_history_id: i64,
}

impl Default for MemoryState {
    fn default() -> Self {
        MemoryState {
            committed: Rows::default(),
            pending: Rows::default(),
            next_instance_id: 1,
            next_history_id: 1,
        }
    }
}

/// Process-local [`Persister`] over plain maps.
#[derive(Debug)]
pub struct MemoryPersister {
    autocommit: bool,
    state: Mutex<MemoryState>,
}

impl Default for MemoryPersister {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersister {
    /// Autocommit-mode persister: every write is immediately durable.
    pub fn new() -> Self {
        MemoryPersister {
            autocommit: true,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Explicit-transaction persister: writes stay pending until `commit`.
    pub fn transactional() -> Self {
        MemoryPersister {
            autocommit: false,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    async fn create_instance(
        &self,
        workflow: &mut WorkflowInstance,
    ) -> Result<RecordId, PersistenceError> {
        if let Some(existing) = workflow.id() {
            return Err(PersistenceError::AlreadyPersisted {
                id: existing.clone(),
            });
        }

        let now = workflow.now();
        let mut state = self.lock();
        let id = RecordId::Int(state.next_instance_id);
        state.next_instance_id += 1;

        let row = InstanceRow {
            state: workflow.state().to_string(),
            last_update: now,
        };
        let target = if self.autocommit {
            &mut state.committed
        } else {
            &mut state.pending
        };
        target.instances.insert(id.clone(), row);
        drop(state);

        workflow.set_last_update(now);
        workflow
            .assign_id(id.clone())
            .map_err(|e| PersistenceError::AlreadyPersisted { id: e.existing })?;
        Ok(id)
    }

    async fn fetch_instance(
        &self,
        id: &RecordId,
    ) -> Result<Option<InstanceState>, PersistenceError> {
        let state = self.lock();
        let row = state
            .pending
            .instances
            .get(id)
            .or_else(|| state.committed.instances.get(id));
        Ok(row.map(|row| InstanceState {
            state: row.state.clone(),
            last_update: row.last_update,
        }))
    }

    async fn update_instance(
        &self,
        workflow: &mut WorkflowInstance,
    ) -> Result<(), PersistenceError> {
        let id = workflow.id().cloned().ok_or(PersistenceError::UnsavedInstance)?;
        let now = workflow.now();

        let mut state = self.lock();
        let row = InstanceRow {
            state: workflow.state().to_string(),
            last_update: now,
        };
        if self.autocommit {
            if state.committed.instances.contains_key(&id) {
                state.committed.instances.insert(id, row);
            }
        } else {
            // Overlay write: only update rows that exist somewhere, matching
            // SQL UPDATE semantics (zero affected rows is not an error).
            if state.pending.instances.contains_key(&id)
                || state.committed.instances.contains_key(&id)
            {
                state.pending.instances.insert(id, row);
            }
        }
        drop(state);

        workflow.set_last_update(now);
        Ok(())
    }

    async fn create_history(
        &self,
        workflow: &WorkflowInstance,
        entries: &mut [HistoryEntry],
    ) -> Result<(), PersistenceError> {
        if workflow.id().is_none() {
            return Err(PersistenceError::UnsavedInstance);
        }

        let mut state = self.lock();
        for entry in entries.iter_mut().filter(|entry| !entry.is_saved()) {
            let id = RecordId::Int(state.next_history_id);
            state.next_history_id += 1;
            entry.mark_saved(id);

            let target = if self.autocommit {
                &mut state.committed
            } else {
                &mut state.pending
            };
            target.history.push(entry.clone());
        }
        Ok(())
    }

    async fn fetch_history(
        &self,
        workflow: &WorkflowInstance,
    ) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let id = workflow.id().ok_or(PersistenceError::UnsavedInstance)?;

        let state = self.lock();
        let mut entries: Vec<HistoryEntry> = state
            .pending
            .history
            .iter()
            .chain(state.committed.history.iter())
            .filter(|entry| entry.workflow_id() == id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.date().cmp(&a.date()));
        Ok(entries)
    }

    async fn commit(&self) -> Result<(), PersistenceError> {
        if self.autocommit {
            tracing::debug!(target: "waypoint::storage::memory", "commit ignored; autocommit enabled");
            return Ok(());
        }
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending);
        state.committed.instances.extend(pending.instances);
        state.committed.history.extend(pending.history);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), PersistenceError> {
        if self.autocommit {
            tracing::warn!(
                target: "waypoint::storage::memory",
                "rollback requested with autocommit enabled; nothing to undo"
            );
            return Ok(());
        }
        let mut state = self.lock();
        state.pending = Rows::default();
        Ok(())
    }
}
