use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::entities::{Dimension, Ticket, TicketStatus};

/// Minimal ticket view carried by events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketRef {
    pub id: String,
    pub organization_id: String,
    pub number: i64,
    pub title: String,
    pub customer_id: String,
    pub assignee_id: Option<String>,
}

impl From<&Ticket> for TicketRef {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id.clone(),
            organization_id: ticket.organization_id.clone(),
            number: ticket.number,
            title: ticket.title.clone(),
            customer_id: ticket.customer_id.clone(),
            assignee_id: ticket.assignee_id.clone(),
        }
    }
}

/// Domain events that fan out into per-user notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    TicketStatusChanged {
        ticket: TicketRef,
        old_status: TicketStatus,
        new_status: TicketStatus,
        actor_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    TicketAssigned {
        ticket: TicketRef,
        assignee_id: String,
        actor_id: String,
        timestamp: DateTime<Utc>,
    },
    SlaBreached {
        ticket: TicketRef,
        deadline: DateTime<Utc>,
        breached_at: DateTime<Utc>,
    },
    UsageThresholdReached {
        organization_id: String,
        dimension: Dimension,
        percent_used: i64,
        period_start: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn organization_id(&self) -> &str {
        match self {
            DomainEvent::TicketStatusChanged { ticket, .. }
            | DomainEvent::TicketAssigned { ticket, .. }
            | DomainEvent::SlaBreached { ticket, .. } => &ticket.organization_id,
            DomainEvent::UsageThresholdReached {
                organization_id, ..
            } => organization_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TicketStatusChanged { .. } => "ticket_status_changed",
            DomainEvent::TicketAssigned { .. } => "ticket_assigned",
            DomainEvent::SlaBreached { .. } => "sla_breached",
            DomainEvent::UsageThresholdReached { .. } => "usage_threshold_reached",
        }
    }
}
