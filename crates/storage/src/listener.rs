//! Transaction control driven by lifecycle events.
//!
//! The rule engine decides whether an action succeeded but knows nothing
//! about storage transactions; the persister owns a transaction window but
//! never closes it on its own. [`TransactionListener`] is the adapter
//! between the two: on `save` it commits, on `rollback` it rolls back, and
//! every other event kind passes through untouched. Alternative commit
//! policies (batching, deferred commit) substitute for this listener
//! without touching either side.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use waypoint_core::{EventKind, LifecycleEvent, LifecycleListener, ListenerError};

use crate::persister::Persister;

/// Maps a workflow type to the persister that stores instances of it.
#[derive(Default)]
pub struct PersisterRegistry {
    by_type: RwLock<HashMap<String, Arc<dyn Persister>>>,
}

impl PersisterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `persister` with `workflow_type`, replacing any previous
    /// association.
    pub fn register(&self, workflow_type: impl Into<String>, persister: Arc<dyn Persister>) {
        let mut by_type = self
            .by_type
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        by_type.insert(workflow_type.into(), persister);
    }

    pub fn resolve(&self, workflow_type: &str) -> Option<Arc<dyn Persister>> {
        let by_type = self
            .by_type
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        by_type.get(workflow_type).cloned()
    }
}

/// Listener that turns `save`/`rollback` events into persister
/// commit/rollback calls. Holds no state beyond the registry handle.
pub struct TransactionListener {
    persisters: Arc<PersisterRegistry>,
}

impl TransactionListener {
    pub fn new(persisters: Arc<PersisterRegistry>) -> Self {
        TransactionListener { persisters }
    }

    fn persister_for(&self, event: &LifecycleEvent) -> Result<Arc<dyn Persister>, ListenerError> {
        let workflow_type = event.workflow().workflow_type();
        self.persisters.resolve(workflow_type).ok_or_else(|| {
            ListenerError::new(format!(
                "no persister registered for workflow type `{}`",
                workflow_type
            ))
        })
    }
}

#[async_trait]
impl LifecycleListener for TransactionListener {
    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), ListenerError> {
        match event.kind() {
            EventKind::Save => {
                let persister = self.persister_for(event)?;
                persister.commit().await.map_err(|e| {
                    tracing::error!(
                        target: "waypoint::storage::listener",
                        workflow_type = event.workflow().workflow_type(),
                        error = %e,
                        "commit failed reacting to save event"
                    );
                    ListenerError::with_source("commit failed reacting to save event", e)
                })
            }
            EventKind::Rollback => {
                let persister = self.persister_for(event)?;
                persister.rollback().await.map_err(|e| {
                    tracing::error!(
                        target: "waypoint::storage::listener",
                        workflow_type = event.workflow().workflow_type(),
                        error = %e,
                        "rollback failed reacting to rollback event"
                    );
                    ListenerError::with_source("rollback failed reacting to rollback event", e)
                })
            }
            EventKind::Other(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPersister;
    use waypoint_core::WorkflowInstance;

    fn ticket() -> WorkflowInstance {
        WorkflowInstance::new("ticket", "NEW", chrono_tz::UTC)
    }

    #[tokio::test]
    async fn save_event_commits_pending_writes() {
        let persister = Arc::new(MemoryPersister::transactional());
        let registry = Arc::new(PersisterRegistry::new());
        registry.register("ticket", persister.clone());
        let listener = TransactionListener::new(registry);

        let mut wf = ticket();
        let id = persister.create_instance(&mut wf).await.unwrap();

        let event = LifecycleEvent::new(EventKind::Save, &wf, "NEW");
        listener.on_event(&event).await.unwrap();

        // Discarding the (now empty) window must not lose the committed row.
        persister.rollback().await.unwrap();
        assert!(persister.fetch_instance(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rollback_event_discards_pending_writes() {
        let persister = Arc::new(MemoryPersister::transactional());
        let registry = Arc::new(PersisterRegistry::new());
        registry.register("ticket", persister.clone());
        let listener = TransactionListener::new(registry);

        let mut wf = ticket();
        let id = persister.create_instance(&mut wf).await.unwrap();

        let event = LifecycleEvent::new(EventKind::Rollback, &wf, "NEW");
        listener.on_event(&event).await.unwrap();

        assert!(persister.fetch_instance(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_kinds_are_ignored() {
        let persister = Arc::new(MemoryPersister::transactional());
        let registry = Arc::new(PersisterRegistry::new());
        registry.register("ticket", persister.clone());
        let listener = TransactionListener::new(registry);

        let mut wf = ticket();
        let id = persister.create_instance(&mut wf).await.unwrap();

        let event = LifecycleEvent::new(EventKind::Other("execute".to_string()), &wf, "NEW");
        listener.on_event(&event).await.unwrap();

        // Still pending: the event did not commit.
        persister.rollback().await.unwrap();
        assert!(persister.fetch_instance(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unregistered_workflow_type_is_an_error() {
        let registry = Arc::new(PersisterRegistry::new());
        let listener = TransactionListener::new(registry);

        let event = LifecycleEvent::new(EventKind::Save, &ticket(), "NEW");
        assert!(listener.on_event(&event).await.is_err());
    }
}
