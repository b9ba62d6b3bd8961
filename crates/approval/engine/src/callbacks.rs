//! Completion callbacks
//!
//! When an instance terminates, the engine schedules one
//! [`CompletionEvent`] for the handler registered for the instance's
//! entity type. Handlers run outside any instance mutation; a failing
//! handler is retried under the bounded retry policy and finally logged
//! as FAILED. A terminal instance is never reopened.

use approval_types::{CompletionEvent, EntityType, RetryPolicy, WorkflowInstanceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Error returned by a completion handler
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallbackError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler rejected event permanently: {0}")]
    Permanent(String),
}

impl CallbackError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Receives the outcome of instances of one entity type
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_complete(&self, event: &CompletionEvent) -> Result<(), CallbackError>;
}

/// Delivery status of a scheduled callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    Pending,
    Delivered,
    Failed,
    /// No handler was registered for the entity type
    Unhandled,
}

/// One scheduled callback
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub event: CompletionEvent,
    pub status: CallbackStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CallbackRecord {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map(|t| t <= now).unwrap_or(true)
    }
}

/// Outcome of one drain pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallbackReport {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub unhandled: usize,
}

/// Default number of finished callbacks kept for lookup
pub const DEFAULT_CALLBACK_RETENTION: usize = 1000;

/// Schedules and invokes completion handlers
pub struct CallbackInvoker {
    handlers: RwLock<HashMap<EntityType, Arc<dyn CompletionHandler>>>,
    queue: Mutex<Vec<CallbackRecord>>,
    /// Newest last, capped at `retention`
    finished: RwLock<VecDeque<CallbackRecord>>,
    /// Instances with a queued or retained callback
    scheduled: Mutex<HashSet<WorkflowInstanceId>>,
    retry: RetryPolicy,
    retention: usize,
}

impl CallbackInvoker {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
            finished: RwLock::new(VecDeque::new()),
            scheduled: Mutex::new(HashSet::new()),
            retry,
            retention: DEFAULT_CALLBACK_RETENTION,
        }
    }

    /// Keep at most `retention` finished callbacks
    ///
    /// An evicted instance is forgotten by the duplicate check as well;
    /// the instance's own fired flag still keeps it from completing twice.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Register the handler for an entity type, replacing any previous one
    pub fn register(&self, entity_type: EntityType, handler: Arc<dyn CompletionHandler>) {
        if self
            .handlers
            .write()
            .insert(entity_type.clone(), handler)
            .is_some()
        {
            tracing::warn!(entity_type = %entity_type, "Completion handler replaced");
        }
    }

    /// Schedule a callback; returns false if one was already scheduled
    /// for the instance
    pub fn schedule(&self, event: CompletionEvent) -> bool {
        if !self.scheduled.lock().insert(event.instance_id.clone()) {
            tracing::warn!(
                instance_id = %event.instance_id,
                "Completion callback already scheduled; ignoring duplicate"
            );
            return false;
        }

        tracing::debug!(
            instance_id = %event.instance_id,
            status = %event.final_status,
            "Completion callback scheduled"
        );
        self.queue.lock().push(CallbackRecord {
            event,
            status: CallbackStatus::Pending,
            attempts: 0,
            last_error: None,
            not_before: None,
            finished_at: None,
        });
        true
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// The most recent callbacks that reached a final status
    pub fn finished(&self) -> Vec<CallbackRecord> {
        self.finished.read().iter().cloned().collect()
    }

    fn record_finished(&self, record: CallbackRecord) {
        let evicted: Vec<WorkflowInstanceId> = {
            let mut finished = self.finished.write();
            finished.push_back(record);
            let excess = finished.len().saturating_sub(self.retention);
            finished
                .drain(..excess)
                .map(|r| r.event.instance_id)
                .collect()
        };
        if !evicted.is_empty() {
            let mut scheduled = self.scheduled.lock();
            for id in &evicted {
                scheduled.remove(id);
            }
        }
    }

    /// Status of the callback of an instance
    pub fn status_of(&self, instance_id: &WorkflowInstanceId) -> Option<CallbackStatus> {
        if self
            .queue
            .lock()
            .iter()
            .any(|r| &r.event.instance_id == instance_id)
        {
            return Some(CallbackStatus::Pending);
        }
        self.finished
            .read()
            .iter()
            .find(|r| &r.event.instance_id == instance_id)
            .map(|r| r.status)
    }

    /// Invoke every callback due at `now`
    pub async fn drain(&self, now: DateTime<Utc>) -> CallbackReport {
        let due: Vec<CallbackRecord> = {
            let mut queue = self.queue.lock();
            let (due, waiting): (Vec<_>, Vec<_>) = queue.drain(..).partition(|r| r.is_due(now));
            *queue = waiting;
            due
        };

        let mut report = CallbackReport::default();
        let mut requeue = Vec::new();

        for mut record in due {
            let handler = self.handlers.read().get(&record.event.entity_type).cloned();
            let Some(handler) = handler else {
                tracing::debug!(
                    instance_id = %record.event.instance_id,
                    entity_type = %record.event.entity_type,
                    "No completion handler registered"
                );
                record.status = CallbackStatus::Unhandled;
                record.finished_at = Some(now);
                self.record_finished(record);
                report.unhandled += 1;
                continue;
            };

            record.attempts += 1;
            match handler.on_complete(&record.event).await {
                Ok(()) => {
                    tracing::info!(
                        instance_id = %record.event.instance_id,
                        attempts = record.attempts,
                        "Completion callback delivered"
                    );
                    record.status = CallbackStatus::Delivered;
                    record.last_error = None;
                    record.finished_at = Some(now);
                    self.record_finished(record);
                    report.delivered += 1;
                }
                Err(e) if e.is_retryable() && !self.retry.exhausted(record.attempts) => {
                    let backoff = chrono::Duration::from_std(self.retry.backoff_for(record.attempts))
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    tracing::warn!(
                        instance_id = %record.event.instance_id,
                        attempts = record.attempts,
                        error = %e,
                        "Completion callback failed; will retry"
                    );
                    record.last_error = Some(e.to_string());
                    record.not_before = Some(now + backoff);
                    requeue.push(record);
                    report.retried += 1;
                }
                Err(e) => {
                    tracing::error!(
                        instance_id = %record.event.instance_id,
                        attempts = record.attempts,
                        error = %e,
                        "Completion callback FAILED"
                    );
                    record.status = CallbackStatus::Failed;
                    record.last_error = Some(e.to_string());
                    record.finished_at = Some(now);
                    self.record_finished(record);
                    report.failed += 1;
                }
            }
        }

        if !requeue.is_empty() {
            self.queue.lock().extend(requeue);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{InstanceStatus, TenantId};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl CompletionHandler for FlakyHandler {
        async fn on_complete(&self, _event: &CompletionEvent) -> Result<(), CallbackError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(CallbackError::Failed(format!("attempt {}", call)))
            } else {
                Ok(())
            }
        }
    }

    fn make_event(id: &str) -> CompletionEvent {
        CompletionEvent {
            instance_id: WorkflowInstanceId::new(id),
            tenant_id: TenantId::new("acme"),
            entity_type: EntityType::new("invoice"),
            entity_id: "INV-1".into(),
            final_status: InstanceStatus::Completed,
            final_action: Some("approve".into()),
            comments: None,
            completed_at: Utc::now(),
        }
    }

    fn make_invoker(fail_first: u32) -> (CallbackInvoker, Arc<FlakyHandler>) {
        let invoker = CallbackInvoker::new(RetryPolicy::immediate(3));
        let handler = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first,
        });
        invoker.register(EntityType::new("invoice"), handler.clone());
        (invoker, handler)
    }

    #[tokio::test]
    async fn test_schedules_once_per_instance() {
        let (invoker, handler) = make_invoker(0);
        assert!(invoker.schedule(make_event("i-1")));
        assert!(!invoker.schedule(make_event("i-1")));

        let report = invoker.drain(Utc::now()).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            invoker.status_of(&WorkflowInstanceId::new("i-1")),
            Some(CallbackStatus::Delivered)
        );
    }

    #[tokio::test]
    async fn test_retries_then_delivers() {
        let (invoker, handler) = make_invoker(2);
        invoker.schedule(make_event("i-1"));
        let now = Utc::now();

        assert_eq!(invoker.drain(now).await.retried, 1);
        assert_eq!(invoker.drain(now).await.retried, 1);
        assert_eq!(invoker.drain(now).await.delivered, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(invoker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed() {
        let (invoker, handler) = make_invoker(10);
        invoker.schedule(make_event("i-1"));
        let now = Utc::now();

        for _ in 0..5 {
            invoker.drain(now).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            invoker.status_of(&WorkflowInstanceId::new("i-1")),
            Some(CallbackStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_finished_log_is_capped() {
        let (invoker, _) = make_invoker(0);
        let invoker = invoker.with_retention(2);
        for i in 0..5 {
            invoker.schedule(make_event(&format!("i-{}", i)));
        }

        assert_eq!(invoker.drain(Utc::now()).await.delivered, 5);
        let kept: Vec<String> = invoker
            .finished()
            .into_iter()
            .map(|r| r.event.instance_id.to_string())
            .collect();
        assert_eq!(kept, vec!["i-3", "i-4"]);
        assert_eq!(invoker.status_of(&WorkflowInstanceId::new("i-0")), None);
        assert_eq!(invoker.scheduled.lock().len(), 2);

        // a retained instance is still protected against a second callback
        assert!(!invoker.schedule(make_event("i-4")));
    }

    #[tokio::test]
    async fn test_unhandled_entity_type() {
        let invoker = CallbackInvoker::new(RetryPolicy::default());
        invoker.schedule(make_event("i-1"));
        let report = invoker.drain(Utc::now()).await;
        assert_eq!(report.unhandled, 1);
        assert_eq!(invoker.finished()[0].status, CallbackStatus::Unhandled);
    }
}
