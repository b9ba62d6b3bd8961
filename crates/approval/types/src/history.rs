//! Append-only workflow history
//!
//! Every mutation of an instance or one of its steps appends exactly one
//! event in the same unit of work. Events of one instance are totally
//! ordered by `sequence`, assigned from a per-instance counter; the
//! wall-clock `recorded_at` is informational only.

use crate::{ActorId, FieldMap, InstanceStatus, StepId, StepInstanceId, StepStatus, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of mutation an event records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventKind {
    InstanceCreated,
    InstanceStarted,
    InstanceSuspended,
    InstanceResumed,
    InstanceCompleted,
    InstanceRejected,
    InstanceCancelled,
    InstanceFailed,
    StepActivated,
    StepActed,
    StepSkipped,
    StepReassigned,
    StepTimedOut,
    StepFailed,
    TaskClaimed,
    TaskDelegated,
    StepOverdue,
    StepEscalated,
    ReminderSent,
    VariableSet,
}

impl std::fmt::Display for HistoryEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// A status transition carried by an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum StatusChange {
    Instance {
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<InstanceStatus>,
        to: InstanceStatus,
    },
    Step {
        step_instance_id: StepInstanceId,
        step_id: StepId,
        from: StepStatus,
        to: StepStatus,
    },
}

/// One append-only history record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Per-instance monotonic sequence, starting at 1
    pub sequence: u64,
    pub instance_id: WorkflowInstanceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_instance_id: Option<StepInstanceId>,
    pub kind: HistoryEventKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<StatusChange>,
    pub actor: ActorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Fields written by this mutation (variables, assignees, due dates)
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub changed_fields: FieldMap,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEvent {
    pub fn new(kind: HistoryEventKind, actor: ActorId) -> Self {
        Self {
            sequence: 0,
            instance_id: WorkflowInstanceId::new(""),
            step_instance_id: None,
            kind,
            changes: Vec::new(),
            actor,
            comments: None,
            changed_fields: FieldMap::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn for_step(mut self, step: StepInstanceId) -> Self {
        self.step_instance_id = Some(step);
        self
    }

    pub fn with_change(mut self, change: StatusChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn with_comments(mut self, comments: Option<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.changed_fields.insert(key.into(), value.into());
        self
    }
}

/// State reconstructed purely from the history stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayedState {
    pub status: InstanceStatus,
    pub current_step: Option<StepInstanceId>,
    /// Last sequence applied
    pub sequence: u64,
}

impl ReplayedState {
    /// Replay events in sequence order. Input order does not matter.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a HistoryEvent>) -> Self {
        let mut ordered: Vec<&HistoryEvent> = events.into_iter().collect();
        ordered.sort_by_key(|e| e.sequence);

        let mut state = Self::default();
        for event in ordered {
            state.apply(event);
        }
        state
    }

    fn apply(&mut self, event: &HistoryEvent) {
        for change in &event.changes {
            match change {
                StatusChange::Instance { to, .. } => self.status = *to,
                StatusChange::Step {
                    step_instance_id,
                    to,
                    ..
                } => {
                    if *to == StepStatus::Active {
                        self.current_step = Some(step_instance_id.clone());
                    } else if self.current_step.as_ref() == Some(step_instance_id) {
                        self.current_step = None;
                    }
                }
            }
        }
        self.sequence = event.sequence;
    }
}
