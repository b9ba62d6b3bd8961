//! Tasks: the unit of work presented to a human actor
//!
//! Every step instance gets one task. The resolved assignee is cached on
//! the task at activation so later delegation or escalation never
//! re-derives a different actor from changed instance data.

use crate::{ActorId, StepInstanceId, TaskId, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The outcome of resolving an assignment rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "actors", rename_all = "snake_case")]
pub enum Assignee {
    /// A single actor owns the task
    Actor(ActorId),
    /// Any member may claim; first claimant wins
    Pool(Vec<ActorId>),
}

impl Assignee {
    /// Every actor the task was originally offered to
    pub fn candidates(&self) -> Vec<&ActorId> {
        match self {
            Self::Actor(actor) => vec![actor],
            Self::Pool(actors) => actors.iter().collect(),
        }
    }

    pub fn contains(&self, actor: &ActorId) -> bool {
        match self {
            Self::Actor(a) => a == actor,
            Self::Pool(actors) => actors.contains(actor),
        }
    }

    pub fn is_pool(&self) -> bool {
        matches!(self, Self::Pool(_))
    }
}

/// Status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for an actor
    #[default]
    Open,
    /// Reserved by one candidate of a pool
    Claimed,
    /// Acted upon
    Done,
    /// Withdrawn (cancellation, reassignment, auto-resolve)
    Withdrawn,
}

/// A task presented to one actor or a pool of actors
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: TaskId,
    pub instance_id: WorkflowInstanceId,
    pub step_instance_id: StepInstanceId,
    /// Assignee as resolved at activation
    pub assignee: Assignee,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowTask {
    pub fn new(
        instance_id: WorkflowInstanceId,
        step_instance_id: StepInstanceId,
        assignee: Assignee,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            instance_id,
            step_instance_id,
            assignee,
            status: TaskStatus::Open,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Open | TaskStatus::Claimed)
    }

    /// The claimant, if another actor than `actor` already holds the claim
    pub fn claimed_by_other(&self, actor: &ActorId) -> Option<&ActorId> {
        self.claimed_by.as_ref().filter(|c| *c != actor)
    }
}
