use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::entities::{ActivityAction, Ticket, TicketStatus};
use crate::domain::errors::DomainError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: TicketStatus,
        to: TicketStatus,
    },
    #[error("Ticket is already closed")]
    AlreadyClosed,
    #[error("Only closed tickets can be reopened (current status: {0})")]
    NotClosed(TicketStatus),
}

impl From<TransitionError> for DomainError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidTransition { .. } => {
                DomainError::ValidationError(err.to_string())
            }
            TransitionError::AlreadyClosed | TransitionError::NotClosed(_) => {
                DomainError::Forbidden(err.to_string())
            }
        }
    }
}

/// A status change that was applied to a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: TicketStatus,
    pub to: TicketStatus,
}

impl StatusChange {
    pub fn is_reopen(&self) -> bool {
        self.from == TicketStatus::Closed && self.to == TicketStatus::Open
    }

    /// Audit action for this change
    pub fn action(&self) -> ActivityAction {
        if self.is_reopen() {
            return ActivityAction::Reopened;
        }
        match self.to {
            TicketStatus::Resolved => ActivityAction::Resolved,
            TicketStatus::Closed => ActivityAction::Closed,
            TicketStatus::Open | TicketStatus::Pending => ActivityAction::StatusChanged,
        }
    }
}

/// Validates if a status transition is allowed
pub fn validate_transition(from: TicketStatus, to: TicketStatus) -> Result<(), TransitionError> {
    use TicketStatus::*;

    match (from, to) {
        (Closed, Closed) => Err(TransitionError::AlreadyClosed),

        // Same state is a no-op
        (a, b) if a == b => Ok(()),

        (Open, Pending) | (Open, Resolved) | (Open, Closed) => Ok(()),
        (Pending, Open) | (Pending, Resolved) | (Pending, Closed) => Ok(()),
        (Resolved, Open) | (Resolved, Closed) => Ok(()),
        (Closed, Open) => Ok(()),

        _ => Err(TransitionError::InvalidTransition { from, to }),
    }
}

/// Apply a status transition and its timestamp side effects.
///
/// Returns `None` for a same-state no-op. Entering resolved/closed stamps the
/// matching timestamp if unset; entering open clears both. Clearing the breach
/// flag and re-arming the deadline belong to [`reopen`].
pub fn apply_status(
    ticket: &mut Ticket,
    to: TicketStatus,
    now: DateTime<Utc>,
) -> Result<Option<StatusChange>, TransitionError> {
    let from = ticket.status;
    validate_transition(from, to)?;
    if from == to {
        return Ok(None);
    }

    ticket.status = to;
    match to {
        TicketStatus::Resolved => {
            ticket.resolved_at.get_or_insert(now);
        }
        TicketStatus::Closed => {
            ticket.closed_at.get_or_insert(now);
        }
        TicketStatus::Open => {
            ticket.closed_at = None;
            ticket.resolved_at = None;
        }
        TicketStatus::Pending => {}
    }
    ticket.updated_at = now;

    Ok(Some(StatusChange { from, to }))
}

/// Explicit reopen: closed -> open, clearing the breach flag.
pub fn reopen(ticket: &mut Ticket, now: DateTime<Utc>) -> Result<StatusChange, TransitionError> {
    if ticket.status != TicketStatus::Closed {
        return Err(TransitionError::NotClosed(ticket.status));
    }
    let change = apply_status(ticket, TicketStatus::Open, now)?
        .ok_or(TransitionError::NotClosed(ticket.status))?;
    ticket.sla_breached = false;
    Ok(change)
}

/// Close regardless of the current state (merge). `None` if already closed.
pub fn force_close(ticket: &mut Ticket, now: DateTime<Utc>) -> Option<StatusChange> {
    if ticket.status == TicketStatus::Closed {
        return None;
    }
    let from = ticket.status;
    ticket.status = TicketStatus::Closed;
    ticket.closed_at.get_or_insert(now);
    ticket.updated_at = now;
    Some(StatusChange {
        from,
        to: TicketStatus::Closed,
    })
}

/// Status side effect of an assignment change. First assignment moves an open
/// ticket to pending; removing the assignee moves a pending ticket back to open.
pub fn assignment_status_effect(
    status: TicketStatus,
    had_assignee: bool,
    has_assignee: bool,
) -> Option<TicketStatus> {
    match (had_assignee, has_assignee, status) {
        (false, true, TicketStatus::Open) => Some(TicketStatus::Pending),
        (true, false, TicketStatus::Pending) => Some(TicketStatus::Open),
        _ => None,
    }
}
