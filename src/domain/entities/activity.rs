use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::domain::entities::Ticket;
use crate::domain::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    StatusChanged,
    PriorityChanged,
    Assigned,
    Unassigned,
    Tagged,
    MessageAdded,
    Resolved,
    Closed,
    Reopened,
    SlaBreached,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Created => "created",
            ActivityAction::StatusChanged => "status_changed",
            ActivityAction::PriorityChanged => "priority_changed",
            ActivityAction::Assigned => "assigned",
            ActivityAction::Unassigned => "unassigned",
            ActivityAction::Tagged => "tagged",
            ActivityAction::MessageAdded => "message_added",
            ActivityAction::Resolved => "resolved",
            ActivityAction::Closed => "closed",
            ActivityAction::Reopened => "reopened",
            ActivityAction::SlaBreached => "sla_breached",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "created" => ActivityAction::Created,
            "status_changed" => ActivityAction::StatusChanged,
            "priority_changed" => ActivityAction::PriorityChanged,
            "assigned" => ActivityAction::Assigned,
            "unassigned" => ActivityAction::Unassigned,
            "tagged" => ActivityAction::Tagged,
            "message_added" => ActivityAction::MessageAdded,
            "resolved" => ActivityAction::Resolved,
            "closed" => ActivityAction::Closed,
            "reopened" => ActivityAction::Reopened,
            "sla_breached" => ActivityAction::SlaBreached,
            other => {
                return Err(DomainError::ValidationError(format!(
                    "Unknown activity action '{}'",
                    other
                )))
            }
        })
    }
}

/// Immutable audit entry. Rows are only ever inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub ticket_id: String,
    pub organization_id: String,
    pub actor_id: Option<String>,
    pub action: ActivityAction,
    /// `{"from": ..., "to": ...}` for field changes, free-form otherwise
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        ticket: &Ticket,
        actor_id: Option<&str>,
        action: ActivityAction,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: ticket.id.clone(),
            organization_id: ticket.organization_id.clone(),
            actor_id: actor_id.map(str::to_string),
            action,
            metadata,
            created_at: now,
        }
    }

    /// Field change entry with before/after values.
    pub fn change(
        ticket: &Ticket,
        actor_id: Option<&str>,
        action: ActivityAction,
        from: Value,
        to: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            ticket,
            actor_id,
            action,
            serde_json::json!({ "from": from, "to": to }),
            now,
        )
    }
}
