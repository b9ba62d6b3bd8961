//! Completion events: what the originating module learns when an instance ends

use crate::{EntityType, InstanceStatus, TenantId, WorkflowInstance, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivered at most once per instance to the completion handler
/// registered for the instance's entity type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub instance_id: WorkflowInstanceId,
    pub tenant_id: TenantId,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// COMPLETED, REJECTED or CANCELLED
    pub final_status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CompletionEvent {
    /// Build the event for a terminal instance
    pub fn from_instance(instance: &WorkflowInstance) -> Option<Self> {
        if !instance.is_terminal() {
            return None;
        }
        Some(Self {
            instance_id: instance.id.clone(),
            tenant_id: instance.tenant_id.clone(),
            entity_type: instance.entity_type.clone(),
            entity_id: instance.entity_id.clone(),
            final_status: instance.status,
            final_action: instance.final_action.clone(),
            comments: instance.final_comments.clone(),
            completed_at: instance.completed_at.unwrap_or(instance.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActorId, SubmitRequest, WorkflowDefinitionId};

    #[test]
    fn test_only_terminal_instances_complete() {
        let request = SubmitRequest::new(
            TenantId::new("acme"),
            EntityType::new("quote"),
            "Q-1",
            ActorId::new("alice"),
        );
        let mut instance =
            WorkflowInstance::new(request, WorkflowDefinitionId::generate(), 1, Utc::now());
        assert!(CompletionEvent::from_instance(&instance).is_none());

        instance.status = InstanceStatus::Completed;
        instance.final_action = Some("approve".into());
        let event = CompletionEvent::from_instance(&instance).unwrap();
        assert_eq!(event.entity_id, "Q-1");
        assert_eq!(event.final_action.as_deref(), Some("approve"));
    }
}
