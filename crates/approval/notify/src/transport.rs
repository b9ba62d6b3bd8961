//! Channel transports
//!
//! The dispatcher is channel-agnostic: every external channel is an
//! injected [`ChannelTransport`]. The in-app inbox is built in and never
//! fails, which makes it the fallback of last resort.

use crate::error::{NotifyError, NotifyResult};
use crate::template::RenderedContent;
use approval_types::{ActorId, Channel, NotificationId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// A delivery channel implementation
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// The channel this transport serves
    fn channel(&self) -> Channel;

    /// Deliver rendered content to a recipient
    async fn send(&self, recipient: &ActorId, content: &RenderedContent) -> NotifyResult<()>;
}

// ── In-app inbox ─────────────────────────────────────────────────────

/// A message stored in an actor's inbox
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub notification_id: Option<NotificationId>,
    pub subject: String,
    pub body: String,
    pub read: bool,
    pub received_at: DateTime<Utc>,
}

/// Default number of messages kept per recipient
pub const DEFAULT_INBOX_LIMIT: usize = 200;

/// Persisted in-app notifications, keyed by recipient
///
/// Each recipient keeps at most `limit` messages; delivering past the
/// limit drops the oldest. [`InAppInbox::take`] drains a recipient
/// entirely.
pub struct InAppInbox {
    messages: RwLock<HashMap<ActorId, VecDeque<InboxMessage>>>,
    limit: usize,
}

impl InAppInbox {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_INBOX_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            limit: limit.max(1),
        }
    }

    /// Store a message; cannot fail
    pub fn deliver(
        &self,
        recipient: &ActorId,
        notification_id: Option<NotificationId>,
        content: &RenderedContent,
    ) {
        let message = InboxMessage {
            notification_id,
            subject: content.subject.clone(),
            body: content.body.clone(),
            read: false,
            received_at: Utc::now(),
        };
        let mut messages = self.messages.write();
        let list = messages.entry(recipient.clone()).or_default();
        list.push_back(message);
        while list.len() > self.limit {
            list.pop_front();
        }
    }

    /// All messages for a recipient, oldest first
    pub fn messages(&self, recipient: &ActorId) -> Vec<InboxMessage> {
        self.messages
            .read()
            .get(recipient)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every message of a recipient, oldest first
    pub fn take(&self, recipient: &ActorId) -> Vec<InboxMessage> {
        self.messages
            .write()
            .remove(recipient)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Number of recipients holding at least one message
    pub fn recipient_count(&self) -> usize {
        self.messages.read().len()
    }

    pub fn unread_count(&self, recipient: &ActorId) -> usize {
        self.messages
            .read()
            .get(recipient)
            .map(|m| m.iter().filter(|msg| !msg.read).count())
            .unwrap_or(0)
    }

    /// Mark every message of a recipient read, returning how many changed
    pub fn mark_all_read(&self, recipient: &ActorId) -> usize {
        let mut messages = self.messages.write();
        let Some(list) = messages.get_mut(recipient) else {
            return 0;
        };
        let mut changed = 0;
        for msg in list.iter_mut().filter(|m| !m.read) {
            msg.read = true;
            changed += 1;
        }
        changed
    }
}

impl Default for InAppInbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelTransport for InAppInbox {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    async fn send(&self, recipient: &ActorId, content: &RenderedContent) -> NotifyResult<()> {
        self.deliver(recipient, None, content);
        Ok(())
    }
}

// ── Log transport ────────────────────────────────────────────────────

/// Writes deliveries to the log; stands in for channels without a
/// configured gateway
pub struct LogTransport {
    channel: Channel,
}

impl LogTransport {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelTransport for LogTransport {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &ActorId, content: &RenderedContent) -> NotifyResult<()> {
        tracing::info!(
            channel = %self.channel,
            recipient = %recipient,
            subject = %content.subject,
            "Notification delivered to log"
        );
        Ok(())
    }
}

// ── Webhook transport ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a ActorId,
    subject: &'a str,
    body: &'a str,
}

/// Posts notifications as JSON to an HTTP endpoint
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> NotifyResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChannelTransport for WebhookTransport {
    fn channel(&self) -> Channel {
        Channel::Webhook
    }

    async fn send(&self, recipient: &ActorId, content: &RenderedContent) -> NotifyResult<()> {
        let payload = WebhookPayload {
            recipient,
            subject: &content.subject,
            body: &content.body,
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::transport(
                Channel::Webhook,
                format!("{} responded {}", self.url, status),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> RenderedContent {
        RenderedContent {
            subject: "Approval needed".into(),
            body: "Please review".into(),
        }
    }

    #[tokio::test]
    async fn test_inbox_delivery() {
        let inbox = InAppInbox::new();
        let bob = ActorId::new("bob");

        inbox.send(&bob, &content()).await.unwrap();
        inbox.send(&bob, &content()).await.unwrap();

        assert_eq!(inbox.messages(&bob).len(), 2);
        assert_eq!(inbox.unread_count(&bob), 2);
        assert_eq!(inbox.mark_all_read(&bob), 2);
        assert_eq!(inbox.unread_count(&bob), 0);
        assert!(inbox.messages(&ActorId::new("eve")).is_empty());
    }

    #[test]
    fn test_inbox_keeps_newest_messages_up_to_limit() {
        let inbox = InAppInbox::with_limit(3);
        let bob = ActorId::new("bob");

        for i in 0..10 {
            inbox.deliver(
                &bob,
                None,
                &RenderedContent {
                    subject: format!("notice {}", i),
                    body: String::new(),
                },
            );
        }

        let subjects: Vec<String> = inbox.messages(&bob).into_iter().map(|m| m.subject).collect();
        assert_eq!(subjects, vec!["notice 7", "notice 8", "notice 9"]);
        assert_eq!(inbox.unread_count(&bob), 3);
    }

    #[test]
    fn test_take_drains_recipient() {
        let inbox = InAppInbox::new();
        let bob = ActorId::new("bob");
        let eve = ActorId::new("eve");
        inbox.deliver(&bob, None, &content());
        inbox.deliver(&bob, None, &content());
        inbox.deliver(&eve, None, &content());

        assert_eq!(inbox.take(&bob).len(), 2);
        assert!(inbox.messages(&bob).is_empty());
        assert!(inbox.take(&bob).is_empty());
        assert_eq!(inbox.recipient_count(), 1);
        assert_eq!(inbox.messages(&eve).len(), 1);
    }

    #[tokio::test]
    async fn test_log_transport_succeeds() {
        let transport = LogTransport::new(Channel::Sms);
        assert_eq!(transport.channel(), Channel::Sms);
        assert!(transport.send(&ActorId::new("bob"), &content()).await.is_ok());
    }

    #[test]
    fn test_webhook_builds() {
        let transport = WebhookTransport::new("http://localhost:9/hook", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.url(), "http://localhost:9/hook");
        assert_eq!(transport.channel(), Channel::Webhook);
    }
}
