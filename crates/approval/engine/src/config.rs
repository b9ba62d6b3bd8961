//! Engine configuration

use crate::callbacks::DEFAULT_CALLBACK_RETENTION;
use approval_notify::{DispatcherSettings, DEFAULT_INBOX_LIMIT};
use approval_types::{EntityType, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What Submit does when the entity already has a live instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResubmissionPolicy {
    /// Refuse with `Conflict`
    #[default]
    Reject,
    /// Start a second, independent instance
    AllowConcurrent,
    /// Create the instance in DRAFT; it starts when the live one terminates
    Queue,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Escalation sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub escalation_sweep_interval_secs: u64,

    /// Notification dispatch interval in seconds
    #[serde(default = "default_dispatch_interval")]
    pub notification_dispatch_interval_secs: u64,

    /// Completion callback drain interval in seconds
    #[serde(default = "default_callback_interval")]
    pub callback_drain_interval_secs: u64,

    /// Retry policy for notification delivery and completion callbacks
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Default re-submission policy
    #[serde(default)]
    pub resubmission: ResubmissionPolicy,

    /// Per-entity-type re-submission policy
    #[serde(default)]
    pub resubmission_overrides: HashMap<EntityType, ResubmissionPolicy>,

    /// Deliver assignment and escalation notices to the in-app inbox when
    /// their channel fails
    #[serde(default = "default_true")]
    pub inbox_fallback: bool,

    /// Maximum notifications attempted per dispatch pass
    #[serde(default = "default_batch_size")]
    pub dispatch_batch_size: usize,

    /// Finished notifications and callbacks kept for status lookup
    #[serde(default = "default_finished_retention")]
    pub finished_retention: usize,

    /// In-app inbox messages kept per recipient
    #[serde(default = "default_inbox_limit")]
    pub inbox_limit: usize,
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_dispatch_interval() -> u64 {
    5
}

fn default_callback_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_finished_retention() -> usize {
    DEFAULT_CALLBACK_RETENTION
}

fn default_inbox_limit() -> usize {
    DEFAULT_INBOX_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            escalation_sweep_interval_secs: default_sweep_interval(),
            notification_dispatch_interval_secs: default_dispatch_interval(),
            callback_drain_interval_secs: default_callback_interval(),
            retry: RetryPolicy::default(),
            resubmission: ResubmissionPolicy::default(),
            resubmission_overrides: HashMap::new(),
            inbox_fallback: true,
            dispatch_batch_size: default_batch_size(),
            finished_retention: default_finished_retention(),
            inbox_limit: default_inbox_limit(),
        }
    }
}

impl EngineConfig {
    pub fn with_resubmission(mut self, entity_type: EntityType, policy: ResubmissionPolicy) -> Self {
        self.resubmission_overrides.insert(entity_type, policy);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Effective re-submission policy for an entity type
    pub fn resubmission_for(&self, entity_type: &EntityType) -> ResubmissionPolicy {
        self.resubmission_overrides
            .get(entity_type)
            .copied()
            .unwrap_or(self.resubmission)
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            retry: self.retry.clone(),
            inbox_fallback: self.inbox_fallback,
            batch_size: self.dispatch_batch_size.max(1),
            retention: self.finished_retention,
            inbox_limit: self.inbox_limit,
        }
    }
}
