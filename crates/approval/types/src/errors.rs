//! Error types for the approval engine

use crate::{
    ActorId, EntityType, InstanceStatus, StepInstanceId, StepStatus, TenantId,
    WorkflowDefinitionId, WorkflowInstanceId,
};

/// Coarse classification used by callers to map errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was not acceptable; never retried by the engine
    Caller,
    /// Infrastructure failure; retried with bounded attempts
    Transient,
    /// Invariant violation; the instance is parked in ERROR
    Fatal,
    /// The referenced object does not exist
    NotFound,
}

/// Errors that can occur in approval workflow operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowError {
    #[error("No workflow definition matched {entity_type} for tenant {tenant_id}")]
    NoDefinitionMatched {
        tenant_id: TenantId,
        entity_type: EntityType,
    },

    #[error("Invalid action '{action}': {reason}")]
    InvalidAction { action: String, reason: String },

    #[error("Actor {actor} may not {operation} {target}")]
    Forbidden {
        actor: ActorId,
        /// `step <id>` or `instance <id>`
        target: String,
        operation: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Step {step} already claimed by {claimed_by}")]
    AlreadyClaimed {
        step: StepInstanceId,
        claimed_by: ActorId,
    },

    #[error("Invariant violation on instance {instance_id}: {reason}")]
    InvariantViolation {
        instance_id: WorkflowInstanceId,
        reason: String,
    },

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(WorkflowInstanceId),

    #[error("Step instance not found: {0}")]
    StepNotFound(StepInstanceId),

    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid condition '{condition}': {reason}")]
    InvalidCondition { condition: String, reason: String },

    #[error("Could not resolve assignee for step {step}: {reason}")]
    AssignmentUnresolved { step: String, reason: String },
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoDefinitionMatched { .. }
            | Self::InvalidAction { .. }
            | Self::Forbidden { .. }
            | Self::Conflict(_)
            | Self::AlreadyClaimed { .. }
            | Self::InvalidDefinition(_)
            | Self::InvalidCondition { .. } => ErrorKind::Caller,
            Self::InvariantViolation { .. } | Self::AssignmentUnresolved { .. } => {
                ErrorKind::Fatal
            }
            Self::InstanceNotFound(_) | Self::StepNotFound(_) | Self::DefinitionNotFound(_) => {
                ErrorKind::NotFound
            }
        }
    }

    /// Whether this error is the caller's fault
    pub fn is_caller_error(&self) -> bool {
        self.kind() == ErrorKind::Caller
    }

    /// An instance is not in a status that allows the operation
    pub fn instance_state(
        instance_id: &WorkflowInstanceId,
        status: InstanceStatus,
        operation: &str,
    ) -> Self {
        Self::Conflict(format!(
            "cannot {} instance {} in status {}",
            operation, instance_id, status
        ))
    }

    /// The actor lacks the right to act on a step
    pub fn forbidden_step(actor: &ActorId, step: &StepInstanceId, operation: &str) -> Self {
        Self::Forbidden {
            actor: actor.clone(),
            target: format!("step {}", step),
            operation: operation.to_string(),
        }
    }

    /// The actor lacks the right to administer an instance
    pub fn forbidden_instance(
        actor: &ActorId,
        instance_id: &WorkflowInstanceId,
        operation: &str,
    ) -> Self {
        Self::Forbidden {
            actor: actor.clone(),
            target: format!("instance {}", instance_id),
            operation: operation.to_string(),
        }
    }

    /// A step is no longer in the status the operation expected
    pub fn step_state(step: &StepInstanceId, status: StepStatus, operation: &str) -> Self {
        Self::Conflict(format!(
            "cannot {} step {} in status {}",
            operation, step, status
        ))
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = WorkflowError::NoDefinitionMatched {
            tenant_id: TenantId::new("acme"),
            entity_type: EntityType::new("quote"),
        };
        assert_eq!(err.kind(), ErrorKind::Caller);
        assert!(err.to_string().contains("quote"));

        let err = WorkflowError::InvariantViolation {
            instance_id: WorkflowInstanceId::new("i-1"),
            reason: "two active steps".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Fatal);

        let err = WorkflowError::InstanceNotFound(WorkflowInstanceId::new("i-2"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_caller_error());
    }

    #[test]
    fn test_state_conflicts() {
        let err = WorkflowError::step_state(
            &StepInstanceId::new("s-1"),
            StepStatus::Completed,
            "act on",
        );
        assert_eq!(err.kind(), ErrorKind::Caller);
        assert_eq!(err.to_string(), "Conflict: cannot act on step s-1 in status COMPLETED");
    }
}
