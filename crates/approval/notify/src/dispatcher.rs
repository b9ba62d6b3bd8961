//! Notification dispatcher
//!
//! Requests are appended to a queue by workflow transitions and delivered
//! later by [`NotificationDispatcher::dispatch_due`], which runs on its own
//! cadence. A failed delivery is retried with backoff until the retry
//! policy is exhausted, then marked FAILED. Delivery failures never reach
//! back into the workflow.

use crate::error::NotifyError;
use crate::request::{NotificationRequest, NotificationStatus};
use crate::template::{RenderedContent, TemplateRegistry};
use crate::transport::{ChannelTransport, InAppInbox, DEFAULT_INBOX_LIMIT};
use approval_types::{Channel, NotificationId, RetryPolicy, WorkflowInstanceId};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Dispatcher settings
#[derive(Clone, Debug)]
pub struct DispatcherSettings {
    pub retry: RetryPolicy,
    /// Deliver fallback-eligible notices to the inbox when their channel gives up
    pub inbox_fallback: bool,
    /// Maximum requests attempted per dispatch pass
    pub batch_size: usize,
    /// Finished requests kept for lookup; older ones are dropped
    pub retention: usize,
    /// Inbox messages kept per recipient; older ones are dropped
    pub inbox_limit: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            inbox_fallback: true,
            batch_size: 100,
            retention: 1000,
            inbox_limit: DEFAULT_INBOX_LIMIT,
        }
    }
}

/// Counts from one dispatch pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    /// Fallback copies written to the inbox
    pub fell_back: usize,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.retried + self.failed
    }
}

enum Attempt {
    Delivered,
    Retry(String),
    GiveUp(String),
}

/// Queues and delivers notifications
pub struct NotificationDispatcher {
    settings: DispatcherSettings,
    templates: Arc<TemplateRegistry>,
    inbox: Arc<InAppInbox>,
    transports: RwLock<HashMap<Channel, Arc<dyn ChannelTransport>>>,
    /// Requests awaiting delivery
    queue: Mutex<Vec<NotificationRequest>>,
    /// Requests that reached a final status, newest last, capped at
    /// `settings.retention`
    finished: RwLock<VecDeque<NotificationRequest>>,
}

impl NotificationDispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        let inbox = Arc::new(InAppInbox::with_limit(settings.inbox_limit));
        Self {
            settings,
            templates: Arc::new(TemplateRegistry::new()),
            inbox,
            transports: RwLock::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
            finished: RwLock::new(VecDeque::new()),
        }
    }

    pub fn with_templates(mut self, templates: Arc<TemplateRegistry>) -> Self {
        self.templates = templates;
        self
    }

    /// Register the transport for its channel, replacing any previous one
    pub fn register_transport(&self, transport: Arc<dyn ChannelTransport>) {
        let channel = transport.channel();
        tracing::info!(channel = %channel, "Registered notification transport");
        self.transports.write().insert(channel, transport);
    }

    pub fn inbox(&self) -> &Arc<InAppInbox> {
        &self.inbox
    }

    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    /// Append a request to the queue
    pub fn enqueue(&self, request: NotificationRequest) -> NotificationId {
        let id = request.id.clone();
        tracing::debug!(
            notification_id = %id,
            channel = %request.channel,
            recipient = %request.recipient,
            template = %request.template,
            "Notification queued"
        );
        self.queue.lock().push(request);
        id
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Requests still queued
    pub fn pending(&self) -> Vec<NotificationRequest> {
        self.queue.lock().clone()
    }

    /// The most recent requests that reached a final status, in
    /// completion order
    pub fn finished(&self) -> Vec<NotificationRequest> {
        self.finished.read().iter().cloned().collect()
    }

    fn record_finished(&self, request: NotificationRequest) {
        let mut finished = self.finished.write();
        finished.push_back(request);
        while finished.len() > self.settings.retention {
            finished.pop_front();
        }
    }

    pub fn find(&self, id: &NotificationId) -> Option<NotificationRequest> {
        if let Some(found) = self.queue.lock().iter().find(|r| &r.id == id) {
            return Some(found.clone());
        }
        self.finished.read().iter().find(|r| &r.id == id).cloned()
    }

    /// Drop undelivered notifications of a cancelled instance
    pub fn suppress_instance(&self, instance_id: &WorkflowInstanceId, now: DateTime<Utc>) -> usize {
        let suppressed: Vec<NotificationRequest> = {
            let mut queue = self.queue.lock();
            let (matching, keep): (Vec<_>, Vec<_>) = queue
                .drain(..)
                .partition(|r| r.instance_id.as_ref() == Some(instance_id));
            *queue = keep;
            matching
        };

        let count = suppressed.len();
        if count > 0 {
            tracing::info!(instance_id = %instance_id, count, "Suppressed pending notifications");
            for mut request in suppressed {
                request.status = NotificationStatus::Suppressed;
                request.finished_at = Some(now);
                self.record_finished(request);
            }
        }
        count
    }

    /// Deliver every request due at `now`, highest priority first
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> DispatchReport {
        let batch = self.take_batch(now);
        let mut report = DispatchReport::default();

        for mut request in batch {
            match self.attempt(&request).await {
                Attempt::Delivered => {
                    request.attempts += 1;
                    request.status = NotificationStatus::Delivered;
                    request.finished_at = Some(now);
                    report.delivered += 1;
                    tracing::debug!(notification_id = %request.id, "Notification delivered");
                    self.record_finished(request);
                }
                Attempt::Retry(error) if !self.settings.retry.exhausted(request.attempts + 1) => {
                    request.attempts += 1;
                    let wait = self.settings.retry.backoff_for(request.attempts);
                    request.not_before = Some(
                        now + Duration::from_std(wait).unwrap_or_else(|_| Duration::zero()),
                    );
                    tracing::warn!(
                        notification_id = %request.id,
                        channel = %request.channel,
                        attempt = request.attempts,
                        error = %error,
                        "Notification delivery failed, will retry"
                    );
                    request.last_error = Some(error);
                    report.retried += 1;
                    self.queue.lock().push(request);
                }
                Attempt::Retry(error) | Attempt::GiveUp(error) => {
                    request.attempts += 1;
                    request.status = NotificationStatus::Failed;
                    request.finished_at = Some(now);
                    tracing::error!(
                        notification_id = %request.id,
                        channel = %request.channel,
                        recipient = %request.recipient,
                        attempts = request.attempts,
                        error = %error,
                        "Notification delivery failed permanently"
                    );
                    request.last_error = Some(error);
                    report.failed += 1;
                    if self.fall_back(&request) {
                        report.fell_back += 1;
                    }
                    self.record_finished(request);
                }
            }
        }

        report
    }

    fn take_batch(&self, now: DateTime<Utc>) -> Vec<NotificationRequest> {
        let mut queue = self.queue.lock();
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            queue.drain(..).partition(|r| r.is_due(now));
        *queue = waiting;

        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        if due.len() > self.settings.batch_size {
            let rest = due.split_off(self.settings.batch_size);
            queue.extend(rest);
        }
        due
    }

    async fn attempt(&self, request: &NotificationRequest) -> Attempt {
        let content = match self.templates.render(&request.template, &request.variables) {
            Ok(content) => content,
            Err(e) => return Attempt::GiveUp(e.to_string()),
        };

        if request.channel == Channel::InApp {
            self.inbox
                .deliver(&request.recipient, Some(request.id.clone()), &content);
            return Attempt::Delivered;
        }

        let transport = self.transports.read().get(&request.channel).cloned();
        let Some(transport) = transport else {
            return Attempt::GiveUp(NotifyError::NoTransport(request.channel).to_string());
        };

        match transport.send(&request.recipient, &content).await {
            Ok(()) => Attempt::Delivered,
            Err(e) if e.is_retryable() => Attempt::Retry(e.to_string()),
            Err(e) => Attempt::GiveUp(e.to_string()),
        }
    }

    fn fall_back(&self, request: &NotificationRequest) -> bool {
        if !self.settings.inbox_fallback
            || !request.fallback_to_inbox
            || request.channel == Channel::InApp
        {
            return false;
        }

        let content = self
            .templates
            .render(&request.template, &request.variables)
            .unwrap_or_else(|_| RenderedContent::plain(&request.template, &request.variables));
        self.inbox
            .deliver(&request.recipient, Some(request.id.clone()), &content);
        tracing::info!(
            notification_id = %request.id,
            recipient = %request.recipient,
            "Notice delivered to in-app inbox after channel failure"
        );
        true
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(DispatcherSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyResult;
    use approval_types::{ActorId, NotificationPriority};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChannelTransport for FlakyTransport {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, _recipient: &ActorId, _content: &RenderedContent) -> NotifyResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(NotifyError::transport(Channel::Email, "smtp unavailable"))
            } else {
                Ok(())
            }
        }
    }

    fn make_dispatcher(fail_first: u32) -> (NotificationDispatcher, Arc<FlakyTransport>) {
        let dispatcher = NotificationDispatcher::new(DispatcherSettings {
            retry: RetryPolicy::immediate(3),
            inbox_fallback: true,
            batch_size: 10,
            ..DispatcherSettings::default()
        });
        let transport = Arc::new(FlakyTransport {
            fail_first,
            calls: AtomicU32::new(0),
        });
        dispatcher.register_transport(transport.clone());
        (dispatcher, transport)
    }

    fn email(to: &str) -> NotificationRequest {
        NotificationRequest::new(ActorId::new(to), Channel::Email, "task_assigned")
            .with_variable("entity_reference", "PO-1")
    }

    #[tokio::test]
    async fn test_delivers_in_app_without_transport() {
        let dispatcher = NotificationDispatcher::default();
        dispatcher.enqueue(NotificationRequest::new(
            ActorId::new("bob"),
            Channel::InApp,
            "task_assigned",
        ));

        let report = dispatcher.dispatch_due(Utc::now()).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(dispatcher.inbox().messages(&ActorId::new("bob")).len(), 1);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_retries_then_delivers() {
        let (dispatcher, transport) = make_dispatcher(2);
        let id = dispatcher.enqueue(email("bob"));
        let now = Utc::now();

        assert_eq!(dispatcher.dispatch_due(now).await.retried, 1);
        assert_eq!(dispatcher.dispatch_due(now).await.retried, 1);
        assert_eq!(dispatcher.dispatch_due(now).await.delivered, 1);

        let request = dispatcher.find(&id).unwrap();
        assert_eq!(request.status, NotificationStatus::Delivered);
        assert_eq!(request.attempts, 3);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fails_after_bounded_attempts() {
        let (dispatcher, transport) = make_dispatcher(u32::MAX);
        let id = dispatcher.enqueue(email("bob"));
        let now = Utc::now();

        for _ in 0..5 {
            dispatcher.dispatch_due(now).await;
        }

        let request = dispatcher.find(&id).unwrap();
        assert_eq!(request.status, NotificationStatus::Failed);
        assert_eq!(request.attempts, 3);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert!(request.last_error.unwrap().contains("smtp unavailable"));
        // not eligible for fallback
        assert!(dispatcher.inbox().messages(&ActorId::new("bob")).is_empty());
    }

    #[tokio::test]
    async fn test_assignment_notice_falls_back_to_inbox() {
        let (dispatcher, _) = make_dispatcher(u32::MAX);
        dispatcher.enqueue(email("bob").with_inbox_fallback());
        let now = Utc::now();

        let mut fell_back = 0;
        for _ in 0..3 {
            fell_back += dispatcher.dispatch_due(now).await.fell_back;
        }

        assert_eq!(fell_back, 1);
        let messages = dispatcher.inbox().messages(&ActorId::new("bob"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "Approval needed: PO-1");
    }

    #[tokio::test]
    async fn test_missing_transport_gives_up_immediately() {
        let dispatcher = NotificationDispatcher::default();
        dispatcher.enqueue(
            NotificationRequest::new(ActorId::new("bob"), Channel::Sms, "task_assigned")
                .with_inbox_fallback(),
        );

        let report = dispatcher.dispatch_due(Utc::now()).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.fell_back, 1);
        assert_eq!(dispatcher.inbox().unread_count(&ActorId::new("bob")), 1);
    }

    #[tokio::test]
    async fn test_backoff_defers_retry() {
        let dispatcher = NotificationDispatcher::new(DispatcherSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 60_000,
                multiplier: 1.0,
                max_backoff_ms: 60_000,
            },
            ..DispatcherSettings::default()
        });
        dispatcher.register_transport(Arc::new(FlakyTransport {
            fail_first: 1,
            calls: AtomicU32::new(0),
        }));
        dispatcher.enqueue(email("bob"));
        let now = Utc::now();

        assert_eq!(dispatcher.dispatch_due(now).await.retried, 1);
        assert_eq!(dispatcher.dispatch_due(now).await.attempted(), 0);
        assert_eq!(
            dispatcher
                .dispatch_due(now + Duration::seconds(61))
                .await
                .delivered,
            1
        );
    }

    #[tokio::test]
    async fn test_priority_order_and_batch_size() {
        let dispatcher = NotificationDispatcher::new(DispatcherSettings {
            batch_size: 1,
            ..DispatcherSettings::default()
        });
        let low = dispatcher.enqueue(
            NotificationRequest::new(ActorId::new("a"), Channel::InApp, "task_assigned")
                .with_priority(NotificationPriority::Low),
        );
        let urgent = dispatcher.enqueue(
            NotificationRequest::new(ActorId::new("b"), Channel::InApp, "task_escalated")
                .with_priority(NotificationPriority::Urgent),
        );

        let now = Utc::now();
        dispatcher.dispatch_due(now).await;
        assert_eq!(
            dispatcher.find(&urgent).unwrap().status,
            NotificationStatus::Delivered
        );
        assert_eq!(dispatcher.find(&low).unwrap().status, NotificationStatus::Pending);

        dispatcher.dispatch_due(now).await;
        assert_eq!(dispatcher.find(&low).unwrap().status, NotificationStatus::Delivered);
    }

    #[tokio::test]
    async fn test_finished_log_keeps_most_recent() {
        let dispatcher = NotificationDispatcher::new(DispatcherSettings {
            retention: 5,
            inbox_limit: 2,
            ..DispatcherSettings::default()
        });
        let ids: Vec<_> = (0..12)
            .map(|_| {
                dispatcher.enqueue(NotificationRequest::new(
                    ActorId::new("bob"),
                    Channel::InApp,
                    "task_assigned",
                ))
            })
            .collect();

        let report = dispatcher.dispatch_due(Utc::now()).await;
        assert_eq!(report.delivered, 12);

        let finished = dispatcher.finished();
        assert_eq!(finished.len(), 5);
        assert!(dispatcher.find(&ids[0]).is_none());
        assert_eq!(
            dispatcher.find(&ids[11]).unwrap().status,
            NotificationStatus::Delivered
        );
        assert_eq!(dispatcher.inbox().messages(&ActorId::new("bob")).len(), 2);
    }

    #[tokio::test]
    async fn test_suppress_instance() {
        let dispatcher = NotificationDispatcher::default();
        let instance = WorkflowInstanceId::generate();
        let id = dispatcher.enqueue(
            NotificationRequest::new(ActorId::new("bob"), Channel::InApp, "task_assigned")
                .for_instance(instance.clone()),
        );
        dispatcher.enqueue(NotificationRequest::new(
            ActorId::new("eve"),
            Channel::InApp,
            "task_assigned",
        ));

        assert_eq!(dispatcher.suppress_instance(&instance, Utc::now()), 1);
        assert_eq!(dispatcher.pending_count(), 1);
        assert_eq!(
            dispatcher.find(&id).unwrap().status,
            NotificationStatus::Suppressed
        );

        dispatcher.dispatch_due(Utc::now()).await;
        assert!(dispatcher.inbox().messages(&ActorId::new("bob")).is_empty());
    }
}
