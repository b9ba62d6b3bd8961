//! Notification error types

use approval_types::{Channel, ErrorKind};
use thiserror::Error;

/// Errors raised while rendering or delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The transport reported a delivery failure
    #[error("{channel} delivery failed: {message}")]
    Transport { channel: Channel, message: String },

    /// HTTP error from a webhook transport
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No transport registered for the channel
    #[error("No transport registered for channel {0}")]
    NoTransport(Channel),

    /// Unknown template
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
}

impl NotifyError {
    pub fn transport(channel: Channel, message: impl Into<String>) -> Self {
        Self::Transport {
            channel,
            message: message.into(),
        }
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Http(_))
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() {
            ErrorKind::Transient
        } else {
            ErrorKind::Caller
        }
    }
}

/// Result type for notification operations
pub type NotifyResult<T> = Result<T, NotifyError>;
