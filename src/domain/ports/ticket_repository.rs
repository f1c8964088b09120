use chrono::{DateTime, Utc};

use crate::domain::entities::{Activity, Ticket, TicketFilter, TicketMessage};
use crate::infrastructure::http::middleware::error::ApiResult;

#[async_trait::async_trait]
pub trait TicketRepository: Send + Sync {
    /// Insert a ticket, allocating the next per-organization number, and append
    /// its creation activity. Returns the stored ticket.
    async fn create_ticket(&self, ticket: &Ticket, activity: &Activity) -> ApiResult<Ticket>;

    async fn get_ticket(&self, id: &str) -> ApiResult<Option<Ticket>>;

    async fn list_tickets(
        &self,
        organization_id: &str,
        filter: &TicketFilter,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<Ticket>>;

    async fn count_tickets(&self, organization_id: &str, filter: &TicketFilter) -> ApiResult<i64>;

    /// Persist the mutable fields of `ticket` and append `activities` in one
    /// transaction. The breach flag is only written when `reset_breach` is set,
    /// and `first_response_at` is never overwritten once stored.
    async fn save_ticket(
        &self,
        ticket: &Ticket,
        activities: &[Activity],
        reset_breach: bool,
    ) -> ApiResult<()>;

    /// One-way breach transition. Flips the flag only while the ticket is
    /// open/pending and not yet flagged; the activity is appended in the same
    /// transaction. Returns whether this call performed the flip.
    async fn mark_sla_breached(&self, ticket_id: &str, activity: &Activity) -> ApiResult<bool>;

    /// Permanently remove a ticket with its messages and audit trail.
    async fn delete_ticket(&self, id: &str) -> ApiResult<bool>;

    /// Append a message and its activity; stamps `first_response_at` when given
    /// and still unset.
    async fn add_message(
        &self,
        message: &TicketMessage,
        activity: &Activity,
        first_response_at: Option<DateTime<Utc>>,
    ) -> ApiResult<()>;

    /// Close a merged ticket in one transaction: write `secondary` (which
    /// carries its merge back-reference), insert the message `copies` into the
    /// primary and append `activity`. Conflict when the ticket was already merged.
    async fn merge_ticket(
        &self,
        secondary: &Ticket,
        copies: &[TicketMessage],
        activity: &Activity,
    ) -> ApiResult<()>;

    async fn list_messages(&self, ticket_id: &str) -> ApiResult<Vec<TicketMessage>>;

    /// Audit timeline in creation order
    async fn list_activities(&self, ticket_id: &str) -> ApiResult<Vec<Activity>>;
}
