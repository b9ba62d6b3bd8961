//! Notification channels and priorities

use serde::{Deserialize, Serialize};

/// Delivery channel for a notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Sms,
    Push,
    /// Persisted inbox record; no external call, always succeeds
    InApp,
    Webhook,
}

impl Channel {
    /// Channels whose delivery depends on an external system
    pub fn is_external(&self) -> bool {
        !matches!(self, Self::InApp)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Push => "PUSH",
            Self::InApp => "IN_APP",
            Self::Webhook => "WEBHOOK",
        };
        f.write_str(s)
    }
}

/// Dispatch order within the queue; higher goes first
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_wire_names() {
        assert_eq!(serde_json::to_string(&Channel::InApp).unwrap(), "\"IN_APP\"");
        assert_eq!(Channel::Webhook.to_string(), "WEBHOOK");
        assert!(!Channel::InApp.is_external());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(NotificationPriority::Urgent > NotificationPriority::High);
        assert!(NotificationPriority::Low < NotificationPriority::default());
    }
}
