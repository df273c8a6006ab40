//! Workflow instance identity and current-state tracking.

use std::fmt;

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Primary-key value of a persisted row.
///
/// Sequence- and auto-increment-backed persisters allocate integers; the
/// random strategy allocates fixed-length text tokens. `RecordId` carries
/// either form so the data model stays neutral across backend families.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Text(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_string())
    }
}

/// A second identifier assignment was attempted on an instance that already
/// has one. The identifier is set exactly once, at creation.
#[derive(Debug, thiserror::Error)]
#[error("workflow instance already has identifier {existing}")]
pub struct IdAlreadyAssigned {
    pub existing: RecordId,
}

/// The persisted entity undergoing state transitions.
///
/// The rule engine owns the `state` field (via [`set_state`]); the persister
/// owns `id` and `last_update`. `workflow_type` doubles as the routing key
/// for lifecycle listeners and persister lookup. `time_zone` is consulted
/// only when a wall-clock timestamp is computed at write time.
///
/// [`set_state`]: WorkflowInstance::set_state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    id: Option<RecordId>,
    workflow_type: String,
    state: String,
    time_zone: Tz,
    last_update: Option<NaiveDateTime>,
}

impl WorkflowInstance {
    /// Create an unsaved instance in the given initial state.
    pub fn new(workflow_type: impl Into<String>, state: impl Into<String>, time_zone: Tz) -> Self {
        WorkflowInstance {
            id: None,
            workflow_type: workflow_type.into(),
            state: state.into(),
            time_zone,
            last_update: None,
        }
    }

    pub fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// Replace the current state name. Called by the rule engine after a
    /// successful transition; the persister writes it back on update.
    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    pub fn last_update(&self) -> Option<NaiveDateTime> {
        self.last_update
    }

    /// Record the timestamp the persister wrote. Not for callers; the
    /// persister sets this at create/update time.
    pub fn set_last_update(&mut self, at: NaiveDateTime) {
        self.last_update = Some(at);
    }

    /// Assign the persisted identifier. Succeeds exactly once; any further
    /// attempt fails, keeping the original identifier in place.
    pub fn assign_id(&mut self, id: RecordId) -> Result<(), IdAlreadyAssigned> {
        match &self.id {
            Some(existing) => Err(IdAlreadyAssigned {
                existing: existing.clone(),
            }),
            None => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    /// Current wall-clock time in this instance's time zone.
    pub fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.time_zone).naive_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_id_succeeds_once() {
        let mut wf = WorkflowInstance::new("ticket", "NEW", chrono_tz::UTC);
        assert!(wf.id().is_none());
        wf.assign_id(RecordId::Int(7)).unwrap();
        assert_eq!(wf.id(), Some(&RecordId::Int(7)));
    }

    #[test]
    fn assign_id_rejects_second_assignment() {
        let mut wf = WorkflowInstance::new("ticket", "NEW", chrono_tz::UTC);
        wf.assign_id(RecordId::Int(7)).unwrap();
        let err = wf.assign_id(RecordId::Int(8)).unwrap_err();
        assert_eq!(err.existing, RecordId::Int(7));
        // The original identifier survives the failed assignment.
        assert_eq!(wf.id(), Some(&RecordId::Int(7)));
    }

    #[test]
    fn set_state_replaces_current_state() {
        let mut wf = WorkflowInstance::new("ticket", "NEW", chrono_tz::UTC);
        wf.set_state("IN_PROGRESS");
        assert_eq!(wf.state(), "IN_PROGRESS");
    }

    #[test]
    fn record_id_display_matches_inner_value() {
        assert_eq!(RecordId::Int(42).to_string(), "42");
        assert_eq!(RecordId::from("a8Xp0Qz1").to_string(), "a8Xp0Qz1");
    }
}
