//! Workflow instances and step instances
//!
//! A WorkflowInstance is one execution of a definition against one
//! business entity. Instances are never deleted; they are mutated only
//! through lifecycle operations of the engine, and every mutation is
//! mirrored by a history event.

use crate::{
    ActorId, EntityType, FieldMap, StepId, StepInstanceId, TenantId, WorkflowDefinitionId,
    WorkflowInstanceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Instance Status ──────────────────────────────────────────────────

/// The lifecycle status of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Created but not yet started
    #[default]
    Draft,
    /// A step is (or is about to be) active
    Running,
    /// Administratively paused; SLA clocks stop
    Suspended,
    /// Terminated by an approving outcome
    Completed,
    /// Terminated by a rejecting outcome
    Rejected,
    /// Cancelled by an actor
    Cancelled,
    /// Invariant violation; awaits an operator
    Error,
}

impl InstanceStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    /// Whether Cancel is legal from this status
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Draft | Self::Running | Self::Suspended)
    }

    /// Legal transitions of the instance state machine
    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        match (self, next) {
            (Draft, Running) | (Draft, Cancelled) => true,
            (Running, Suspended | Completed | Rejected | Cancelled | Error) => true,
            (Suspended, Running | Cancelled | Error) => true,
            (Draft, Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

// ── Workflow Instance ────────────────────────────────────────────────

/// A running (or finished) execution of a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance identifier
    pub id: WorkflowInstanceId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// The definition version this instance is pinned to
    pub definition_id: WorkflowDefinitionId,
    pub definition_version: u32,
    /// Type of the submitted entity
    pub entity_type: EntityType,
    /// Caller's entity id (correlation key)
    pub entity_id: String,
    /// Human-readable reference (e.g. `LV-2024-0012`)
    pub entity_reference: String,
    /// Who submitted the entity
    pub initiator: ActorId,
    /// Current status
    pub status: InstanceStatus,
    /// Cached pointer to the ACTIVE step instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepInstanceId>,
    /// Due date of the current step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_deadline: Option<DateTime<Utc>>,
    /// Action that terminated the instance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_action: Option<String>,
    /// Comments accompanying the terminating action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_comments: Option<String>,
    /// Fields submitted with the entity
    #[serde(default)]
    pub form_data: FieldMap,
    /// Set exactly once, when the completion callback is scheduled
    pub callback_fired: bool,
    /// When the instance was suspended (while SUSPENDED)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
    /// Why the instance moved to ERROR
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything the caller supplies on Submit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub tenant_id: TenantId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_reference: String,
    pub initiator: ActorId,
    #[serde(default)]
    pub form_data: FieldMap,
}

impl SubmitRequest {
    pub fn new(
        tenant_id: TenantId,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        initiator: ActorId,
    ) -> Self {
        let entity_id = entity_id.into();
        Self {
            tenant_id,
            entity_type,
            entity_reference: entity_id.clone(),
            entity_id,
            initiator,
            form_data: FieldMap::new(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.entity_reference = reference.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.form_data.insert(key.into(), value.into());
        self
    }
}

impl WorkflowInstance {
    /// Create a DRAFT instance for a submission
    pub fn new(
        request: SubmitRequest,
        definition_id: WorkflowDefinitionId,
        definition_version: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowInstanceId::generate(),
            tenant_id: request.tenant_id,
            definition_id,
            definition_version,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            entity_reference: request.entity_reference,
            initiator: request.initiator,
            status: InstanceStatus::Draft,
            current_step: None,
            sla_deadline: None,
            final_action: None,
            final_comments: None,
            form_data: request.form_data,
            callback_fired: false,
            suspended_at: None,
            error_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ── Step Status ──────────────────────────────────────────────────────

/// The status of a single step instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Materialized but not yet active
    #[default]
    Pending,
    /// Waiting for an actor
    Active,
    /// Finished with an approving outcome
    Completed,
    /// Bypassed (cancellation)
    Skipped,
    /// Finished with a rejecting outcome
    Rejected,
    /// Replaced by a reassigned step instance
    Escalated,
    /// Resolved automatically after the SLA ran out
    Timeout,
    /// Frozen because the instance moved to ERROR
    Error,
}

impl StepStatus {
    /// Whether the step can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Active)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Skipped => "SKIPPED",
            Self::Rejected => "REJECTED",
            Self::Escalated => "ESCALATED",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

// ── Step Instance ────────────────────────────────────────────────────

/// One activation of a step definition within an instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowStepInstance {
    pub id: StepInstanceId,
    pub instance_id: WorkflowInstanceId,
    /// The step definition this activates
    pub step_id: StepId,
    /// Activation order within the instance (1-based)
    pub ordinal: u32,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub is_overdue: bool,
    /// Number of escalation stages already applied; never decreases
    pub escalation_level: u32,
    /// Single assignee (None for pool assignments until claimed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_from: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<ActorId>,
    /// Backup actors added by escalation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub escalated_to: Vec<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acted_by: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStepInstance {
    /// Materialize a PENDING step instance
    pub fn pending(instance_id: WorkflowInstanceId, step_id: StepId, ordinal: u32) -> Self {
        Self {
            id: StepInstanceId::generate(),
            instance_id,
            step_id,
            ordinal,
            status: StepStatus::Pending,
            due_date: None,
            is_overdue: false,
            escalation_level: 0,
            assigned_to: None,
            delegated_from: None,
            delegated_to: None,
            escalated_to: Vec::new(),
            action: None,
            acted_by: None,
            comments: None,
            activated_at: None,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == StepStatus::Active
    }

    /// Whether the step is active and past its due date at `now`
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.due_date.map(|due| now > due).unwrap_or(false)
    }
}
