use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SlaBreached,
    TicketAssigned,
    TicketStatusChanged,
    UsageAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SlaBreached => "sla_breached",
            NotificationKind::TicketAssigned => "ticket_assigned",
            NotificationKind::TicketStatusChanged => "ticket_status_changed",
            NotificationKind::UsageAlert => "usage_alert",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sla_breached" => Ok(NotificationKind::SlaBreached),
            "ticket_assigned" => Ok(NotificationKind::TicketAssigned),
            "ticket_status_changed" => Ok(NotificationKind::TicketStatusChanged),
            "usage_alert" => Ok(NotificationKind::UsageAlert),
            other => Err(DomainError::ValidationError(format!(
                "Unknown notification kind '{}'",
                other
            ))),
        }
    }
}

/// One recipient's notification, as carried by a `deliver_notification` job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundNotification {
    pub recipient_user_id: String,
    pub organization_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub context: Value,
    /// Identical keys are delivered at most once
    pub dedupe_key: String,
}

/// Delivered notification as stored in the in-app inbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_user_id: String,
    pub organization_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub context: Value,
    pub dedupe_key: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_outbound(outbound: OutboundNotification, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_user_id: outbound.recipient_user_id,
            organization_id: outbound.organization_id,
            kind: outbound.kind,
            title: outbound.title,
            message: outbound.message,
            context: outbound.context,
            dedupe_key: outbound.dedupe_key,
            is_read: false,
            created_at: now,
        }
    }
}
