use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::Priority;

/// Organization-scoped SLA targets for one priority tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub priority: Priority,
    pub first_response_minutes: i64,
    pub resolution_minutes: i64,
    /// At most one default per (organization, priority)
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SlaPolicy {
    pub fn new(organization_id: String, request: CreateSlaPolicy, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id,
            name: request.name,
            priority: request.priority,
            first_response_minutes: request.first_response_minutes,
            resolution_minutes: request.resolution_minutes,
            is_default: request.is_default,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSlaPolicy {
    pub name: String,
    pub priority: Priority,
    pub first_response_minutes: i64,
    pub resolution_minutes: i64,
    #[serde(default = "default_true")]
    pub is_default: bool,
}

fn default_true() -> bool {
    true
}

impl CreateSlaPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Policy name must not be empty".to_string());
        }
        if self.first_response_minutes <= 0 {
            return Err("first_response_minutes must be positive".to_string());
        }
        if self.resolution_minutes <= 0 {
            return Err("resolution_minutes must be positive".to_string());
        }
        if self.resolution_minutes < self.first_response_minutes {
            return Err("resolution_minutes must not be shorter than first_response_minutes".to_string());
        }
        Ok(())
    }
}

/// System-wide first-response targets used when an organization has no policy.
/// Built once at startup and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaDefaults {
    pub low_minutes: i64,
    pub medium_minutes: i64,
    pub high_minutes: i64,
    pub urgent_minutes: i64,
}

impl SlaDefaults {
    pub fn first_response_minutes(&self, priority: Priority) -> i64 {
        match priority {
            Priority::Low => self.low_minutes,
            Priority::Medium => self.medium_minutes,
            Priority::High => self.high_minutes,
            Priority::Urgent => self.urgent_minutes,
        }
    }
}

impl Default for SlaDefaults {
    fn default() -> Self {
        Self {
            low_minutes: 24 * 60,
            medium_minutes: 8 * 60,
            high_minutes: 4 * 60,
            urgent_minutes: 60,
        }
    }
}

/// Deferred check payload. The deadline is informational; the check always
/// re-reads the ticket's current deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaCheckPayload {
    pub ticket_id: String,
    pub organization_id: String,
    pub deadline: DateTime<Utc>,
}

/// What a deferred breach check decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachOutcome {
    /// The flag was flipped by this check
    Breached,
    /// Deadline not passed yet (e.g. re-armed after a reopen)
    NotDue,
    /// Resolved/closed, already responded, already breached, or no deadline
    NotApplicable,
    /// Ticket was deleted
    TicketGone,
}
