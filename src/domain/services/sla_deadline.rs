use chrono::{DateTime, Utc};

use crate::domain::entities::{BreachOutcome, Priority, SlaDefaults, SlaPolicy, Ticket};
use crate::domain::services::period::deadline_after;

/// First-response target for a priority: the organization's default policy
/// for that tier wins, otherwise the system defaults apply.
pub fn resolve_first_response_minutes(
    policy: Option<&SlaPolicy>,
    priority: Priority,
    defaults: &SlaDefaults,
) -> i64 {
    policy
        .filter(|p| p.priority == priority)
        .map(|p| p.first_response_minutes)
        .unwrap_or_else(|| defaults.first_response_minutes(priority))
}

pub fn compute_deadline(
    policy: Option<&SlaPolicy>,
    priority: Priority,
    defaults: &SlaDefaults,
    from: DateTime<Utc>,
) -> DateTime<Utc> {
    deadline_after(from, resolve_first_response_minutes(policy, priority, defaults))
}

/// Decide what a deferred check should do with the ticket as it is now.
/// Only an active, unresponded, unflagged ticket strictly past its current
/// deadline breaches.
pub fn breach_decision(ticket: &Ticket, now: DateTime<Utc>) -> BreachOutcome {
    if !ticket.status.is_active() || ticket.sla_breached || ticket.first_response_at.is_some() {
        return BreachOutcome::NotApplicable;
    }
    match ticket.sla_deadline {
        None => BreachOutcome::NotApplicable,
        Some(deadline) if now > deadline => BreachOutcome::Breached,
        Some(_) => BreachOutcome::NotDue,
    }
}
