//! Lifecycle events and listener dispatch.
//!
//! After the rule engine executes an action it raises a [`LifecycleEvent`]
//! describing the outcome: `Save` on success, `Rollback` on failure, and
//! whatever other kinds an engine chooses to emit. Listeners subscribe per
//! workflow type through the [`LifecycleDispatcher`] and receive every event
//! raised for instances of that type. The dispatcher interprets nothing
//! itself; kinds it does not recognize still reach every listener.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::instance::WorkflowInstance;

/// What happened to the action that raised the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The action succeeded; pending writes should become durable.
    Save,
    /// The action failed; pending writes should be discarded.
    Rollback,
    /// Any other engine-defined kind, passed through unexamined.
    Other(String),
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Save => write!(f, "save"),
            EventKind::Rollback => write!(f, "rollback"),
            EventKind::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// A notification raised after an action executes.
///
/// Carries a snapshot of the owning instance (listeners route on its
/// workflow type) and the state the action targeted. The target state is
/// not interpreted by this subsystem; it travels for listeners that want it.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    kind: EventKind,
    workflow: WorkflowInstance,
    target_state: String,
}

impl LifecycleEvent {
    pub fn new(
        kind: EventKind,
        workflow: &WorkflowInstance,
        target_state: impl Into<String>,
    ) -> Self {
        LifecycleEvent {
            kind,
            workflow: workflow.clone(),
            target_state: target_state.into(),
        }
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn workflow(&self) -> &WorkflowInstance {
        &self.workflow
    }

    pub fn target_state(&self) -> &str {
        &self.target_state
    }
}

/// Failure inside a listener reaction. Propagates to whatever invoked the
/// dispatch, typically terminating the action's execution cycle.
#[derive(Debug, thiserror::Error)]
#[error("{context}")]
pub struct ListenerError {
    context: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ListenerError {
    pub fn new(context: impl Into<String>) -> Self {
        ListenerError {
            context: context.into(),
            source: None,
        }
    }

    pub fn with_source(
        context: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        ListenerError {
            context: context.into(),
            source: Some(source.into()),
        }
    }
}

/// A reaction to lifecycle events.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn on_event(&self, event: &LifecycleEvent) -> Result<(), ListenerError>;
}

/// Routes events to listeners registered for the event's workflow type.
///
/// Listeners run sequentially in registration order; the first error stops
/// delivery and propagates to the caller.
#[derive(Default)]
pub struct LifecycleDispatcher {
    listeners: RwLock<HashMap<String, Vec<Arc<dyn LifecycleListener>>>>,
}

impl LifecycleDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to every event raised for instances of
    /// `workflow_type`.
    pub fn register(&self, workflow_type: impl Into<String>, listener: Arc<dyn LifecycleListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners
            .entry(workflow_type.into())
            .or_default()
            .push(listener);
    }

    /// Deliver `event` to every listener registered for its workflow type.
    pub async fn dispatch(&self, event: &LifecycleEvent) -> Result<(), ListenerError> {
        let targets: Vec<Arc<dyn LifecycleListener>> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            listeners
                .get(event.workflow().workflow_type())
                .cloned()
                .unwrap_or_default()
        };
        for listener in targets {
            listener.on_event(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::instance::WorkflowInstance;

    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl Recording {
        fn new() -> Arc<Self> {
            Arc::new(Recording {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn kinds(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LifecycleListener for Recording {
        async fn on_event(&self, event: &LifecycleEvent) -> Result<(), ListenerError> {
            self.seen.lock().unwrap().push(event.kind().to_string());
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl LifecycleListener for AlwaysFails {
        async fn on_event(&self, _event: &LifecycleEvent) -> Result<(), ListenerError> {
            Err(ListenerError::new("listener refused the event"))
        }
    }

    fn ticket() -> WorkflowInstance {
        WorkflowInstance::new("ticket", "NEW", chrono_tz::UTC)
    }

    #[tokio::test]
    async fn dispatch_routes_by_workflow_type() {
        let dispatcher = LifecycleDispatcher::new();
        let tickets = Recording::new();
        let orders = Recording::new();
        dispatcher.register("ticket", tickets.clone());
        dispatcher.register("order", orders.clone());

        let event = LifecycleEvent::new(EventKind::Save, &ticket(), "NEW");
        dispatcher.dispatch(&event).await.unwrap();

        assert_eq!(tickets.kinds(), vec!["save"]);
        assert!(orders.kinds().is_empty());
    }

    #[tokio::test]
    async fn unrecognized_kinds_still_reach_listeners() {
        let dispatcher = LifecycleDispatcher::new();
        let recording = Recording::new();
        dispatcher.register("ticket", recording.clone());

        let event = LifecycleEvent::new(
            EventKind::Other("execute".to_string()),
            &ticket(),
            "IN_PROGRESS",
        );
        dispatcher.dispatch(&event).await.unwrap();

        assert_eq!(recording.kinds(), vec!["execute"]);
    }

    #[tokio::test]
    async fn first_listener_error_stops_delivery() {
        let dispatcher = LifecycleDispatcher::new();
        let recording = Recording::new();
        dispatcher.register("ticket", Arc::new(AlwaysFails));
        dispatcher.register("ticket", recording.clone());

        let event = LifecycleEvent::new(EventKind::Save, &ticket(), "NEW");
        assert!(dispatcher.dispatch(&event).await.is_err());
        assert!(recording.kinds().is_empty());
    }

    #[tokio::test]
    async fn dispatch_without_listeners_is_ok() {
        let dispatcher = LifecycleDispatcher::new();
        let event = LifecycleEvent::new(EventKind::Rollback, &ticket(), "NEW");
        dispatcher.dispatch(&event).await.unwrap();
    }
}
