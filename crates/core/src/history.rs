//! Transition history entries.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::instance::{RecordId, WorkflowInstance};

/// A history entry referenced a workflow instance that has never been
/// persisted, so there is no identifier to record against.
#[derive(Debug, thiserror::Error)]
#[error("workflow instance has no persisted identifier to reference")]
pub struct UnsavedWorkflow;

/// An immutable record of one executed transition.
///
/// Entries are created in memory by the rule engine as a side effect of each
/// transition and persisted in a batch alongside the instance update. The
/// `saved` flag distinguishes rows already durably written from rows still
/// pending; persisting an entry sets it. Entries that are already saved are
/// skipped on subsequent persistence calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    id: Option<RecordId>,
    workflow_id: RecordId,
    action: String,
    description: String,
    state: String,
    user: String,
    date: NaiveDateTime,
    saved: bool,
}

impl HistoryEntry {
    /// Build an entry with an explicit timestamp.
    pub fn new(
        workflow_id: RecordId,
        action: impl Into<String>,
        description: impl Into<String>,
        state: impl Into<String>,
        user: impl Into<String>,
        date: NaiveDateTime,
    ) -> Self {
        HistoryEntry {
            id: None,
            workflow_id,
            action: action.into(),
            description: description.into(),
            state: state.into(),
            user: user.into(),
            date,
            saved: false,
        }
    }

    /// Build an entry for a transition that just executed on `workflow`:
    /// the entry records the instance's current state and a timestamp
    /// computed now, in the instance's time zone.
    pub fn for_transition(
        workflow: &WorkflowInstance,
        action: impl Into<String>,
        description: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Self, UnsavedWorkflow> {
        let workflow_id = workflow.id().cloned().ok_or(UnsavedWorkflow)?;
        Ok(HistoryEntry::new(
            workflow_id,
            action,
            description,
            workflow.state(),
            user,
            workflow.now(),
        ))
    }

    pub fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    pub fn workflow_id(&self) -> &RecordId {
        &self.workflow_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn date(&self) -> NaiveDateTime {
        self.date
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Record the identifier the persister allocated and flag the entry as
    /// durably written. Called by persisters only.
    pub fn mark_saved(&mut self, id: RecordId) {
        self.id = Some(id);
        self.saved = true;
    }

    /// Reconstruct an already-persisted entry from stored fields. Used by
    /// persisters when materializing fetched rows; the result is saved.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: RecordId,
        workflow_id: RecordId,
        action: impl Into<String>,
        description: impl Into<String>,
        state: impl Into<String>,
        user: impl Into<String>,
        date: NaiveDateTime,
    ) -> Self {
        HistoryEntry {
            id: Some(id),
            workflow_id,
            action: action.into(),
            description: description.into(),
            state: state.into(),
            user: user.into(),
            date,
            saved: true,
        }
    }
}
