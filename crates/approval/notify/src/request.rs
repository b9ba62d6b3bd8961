//! Notification requests and their delivery status

use approval_types::{
    ActorId, Channel, FieldMap, NotificationId, NotificationPriority, StepInstanceId,
    WorkflowInstanceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Delivered,
    /// Attempts exhausted; logged, never rolls back the workflow
    Failed,
    /// Dropped before delivery because its instance was cancelled
    Suppressed,
}

impl NotificationStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A queued notification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub id: NotificationId,
    pub recipient: ActorId,
    pub channel: Channel,
    /// Template name
    pub template: String,
    pub variables: FieldMap,
    pub priority: NotificationPriority,
    pub status: NotificationStatus,
    /// Delivery attempts made so far
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Instance this notice belongs to, for suppression on cancel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<WorkflowInstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_instance_id: Option<StepInstanceId>,
    /// Deliver to the in-app inbox if this channel gives up
    pub fallback_to_inbox: bool,
    pub created_at: DateTime<Utc>,
    /// Not dispatched before this time (retry backoff)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl NotificationRequest {
    pub fn new(recipient: ActorId, channel: Channel, template: impl Into<String>) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient,
            channel,
            template: template.into(),
            variables: FieldMap::new(),
            priority: NotificationPriority::Normal,
            status: NotificationStatus::Pending,
            attempts: 0,
            last_error: None,
            instance_id: None,
            step_instance_id: None,
            fallback_to_inbox: false,
            created_at: Utc::now(),
            not_before: None,
            finished_at: None,
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_instance(mut self, instance_id: WorkflowInstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn for_step(mut self, step: StepInstanceId) -> Self {
        self.step_instance_id = Some(step);
        self
    }

    /// Mark as an assignment or escalation notice that must reach the actor
    pub fn with_inbox_fallback(mut self) -> Self {
        self.fallback_to_inbox = true;
        self
    }

    pub fn created_at(mut self, now: DateTime<Utc>) -> Self {
        self.created_at = now;
        self
    }

    /// Whether the request may be attempted at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Pending && self.not_before.map_or(true, |t| t <= now)
    }
}
