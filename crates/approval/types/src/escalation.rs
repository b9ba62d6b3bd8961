//! Escalation policies: what happens as a step approaches or passes its SLA
//!
//! A policy is an ordered chain of stages. Each stage fires at a point
//! relative to the step's due date (negative offsets fire before the
//! deadline, e.g. a reminder an hour ahead). The sweep applies stages in
//! order and records how many have fired as the step's escalation level,
//! which never decreases.

use crate::AssignmentRule;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An ordered escalation chain for one step
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    #[serde(default)]
    pub stages: Vec<EscalationStage>,
}

impl EscalationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: EscalationStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages at or beyond `level` whose trigger time has passed at `now`,
    /// paired with their index. Stages are assumed to be ordered by offset;
    /// the scan stops at the first stage still in the future so the chain
    /// is always applied in order.
    pub fn due_stages(
        &self,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
        level: u32,
    ) -> Vec<(u32, &EscalationStage)> {
        let mut due_stages = Vec::new();
        for (index, stage) in self.stages.iter().enumerate().skip(level as usize) {
            if stage.trigger_at(due) > now {
                break;
            }
            due_stages.push((index as u32, stage));
        }
        due_stages
    }
}

/// One link in the escalation chain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationStage {
    /// Minutes relative to the due date (negative = before)
    pub offset_minutes: i64,
    pub action: EscalationAction,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl EscalationStage {
    pub fn new(offset_minutes: i64, action: EscalationAction) -> Self {
        Self {
            offset_minutes,
            action,
            description: String::new(),
        }
    }

    /// Reminder `minutes` before the deadline
    pub fn remind_before(minutes: i64) -> Self {
        Self::new(-minutes, EscalationAction::Remind)
    }

    /// Add a backup actor `minutes` after the deadline
    pub fn escalate_after(minutes: i64, backup: AssignmentRule) -> Self {
        Self::new(minutes, EscalationAction::EscalateTo { assignment: backup })
    }

    /// Resolve the step with `action` `minutes` after the deadline
    pub fn auto_resolve_after(minutes: i64, action: impl Into<String>) -> Self {
        Self::new(
            minutes,
            EscalationAction::AutoResolve {
                action: action.into(),
            },
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn trigger_at(&self, due: DateTime<Utc>) -> DateTime<Utc> {
        due + Duration::minutes(self.offset_minutes)
    }
}

/// Action applied when a stage fires
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationAction {
    /// Re-notify the current assignees
    Remind,
    /// Add backup actors; the original assignee keeps the right to act
    EscalateTo { assignment: AssignmentRule },
    /// Replace the assignee with a fresh step instance
    Reassign { assignment: AssignmentRule },
    /// Resolve the step with this action on behalf of the system
    AutoResolve { action: String },
}

impl EscalationAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Remind => "remind",
            Self::EscalateTo { .. } => "escalate",
            Self::Reassign { .. } => "reassign",
            Self::AutoResolve { .. } => "auto_resolve",
        }
    }
}
