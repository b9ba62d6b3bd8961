//! Notification dispatch for approval workflows
//!
//! Workflow transitions enqueue [`NotificationRequest`]s; the
//! [`NotificationDispatcher`] renders and delivers them on its own cadence
//! through injected [`ChannelTransport`]s. Delivery retries are bounded by
//! a [`RetryPolicy`](approval_types::RetryPolicy); assignment and
//! escalation notices fall back to the built-in [`InAppInbox`] so a task is
//! never silently lost.

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod error;
pub mod request;
pub mod template;
pub mod transport;

pub use dispatcher::{DispatchReport, DispatcherSettings, NotificationDispatcher};
pub use error::{NotifyError, NotifyResult};
pub use request::{NotificationRequest, NotificationStatus};
pub use template::{
    RenderedContent, Template, TemplateRegistry, TEMPLATE_INSTANCE_FINISHED,
    TEMPLATE_TASK_ASSIGNED, TEMPLATE_TASK_DELEGATED, TEMPLATE_TASK_ESCALATED,
    TEMPLATE_TASK_REMINDER,
};
pub use transport::{
    ChannelTransport, InAppInbox, InboxMessage, LogTransport, WebhookTransport, DEFAULT_INBOX_LIMIT,
};
