use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::application::services::{NotificationService, SlaService, UsageService};
use crate::domain::entities::{
    normalize_tags, Activity, ActivityAction, Actor, AddMessage, BulkAssign, BulkDelete,
    BulkResult, BulkUpdate, CreateTicket, Dimension, MergeTickets, PaginationMetadata, Ticket,
    TicketFilter, TicketListResponse, TicketMessage, TicketStatus, UpdateTicket, MAX_BULK_IDS,
};
use crate::domain::errors::DomainError;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{
    member_directory::MemberDirectory, ticket_repository::TicketRepository,
    time_service::TimeService,
};
use crate::domain::services::state_machine::{
    apply_status, assignment_status_effect, force_close, reopen, StatusChange, TransitionError,
};
use crate::domain::services::{ensure, ensure_same_organization, ensure_ticket_access, Capability};
use crate::infrastructure::http::middleware::error::{ApiError, ApiResult};

const MAX_PER_PAGE: i64 = 100;

#[derive(Clone)]
pub struct TicketService {
    tickets: Arc<dyn TicketRepository>,
    members: Arc<dyn MemberDirectory>,
    usage: UsageService,
    sla: SlaService,
    notifications: NotificationService,
    clock: Arc<dyn TimeService>,
}

impl TicketService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        members: Arc<dyn MemberDirectory>,
        usage: UsageService,
        sla: SlaService,
        notifications: NotificationService,
        clock: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            tickets,
            members,
            usage,
            sla,
            notifications,
            clock,
        }
    }

    // ========================================
    // Helpers
    // ========================================

    async fn load(&self, ticket_id: &str) -> ApiResult<Ticket> {
        self.tickets
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Ticket {} not found", ticket_id)))
    }

    async fn load_for(&self, actor: &Actor, ticket_id: &str, capability: Capability) -> ApiResult<Ticket> {
        let ticket = self.load(ticket_id).await?;
        ensure_ticket_access(actor, &ticket, capability)?;
        Ok(ticket)
    }

    /// Assignees must be staff members of the ticket's organization.
    async fn ensure_assignable(&self, organization_id: &str, user_id: &str) -> ApiResult<()> {
        match self.members.find_member(organization_id, user_id).await? {
            Some(member) if member.role.is_staff() => Ok(()),
            Some(_) => Err(ApiError::BadRequest(format!(
                "User {} is not an agent and cannot be assigned tickets",
                user_id
            ))),
            None => Err(ApiError::NotFound(format!(
                "User {} is not a member of this organization",
                user_id
            ))),
        }
    }

    /// Move `ticket` to `to`, staging the status activity. Closed -> open goes
    /// through the reopen rules, which also set a fresh deadline from `now`.
    async fn stage_status(
        &self,
        ticket: &mut Ticket,
        to: TicketStatus,
        actor_id: Option<&str>,
        now: DateTime<Utc>,
        activities: &mut Vec<Activity>,
    ) -> ApiResult<Option<StatusChange>> {
        let change = if ticket.status == TicketStatus::Closed && to == TicketStatus::Open {
            Some(reopen(ticket, now).map_err(DomainError::from)?)
        } else {
            apply_status(ticket, to, now).map_err(DomainError::from)?
        };

        let Some(change) = change else {
            return Ok(None);
        };
        if change.is_reopen() {
            let deadline = self
                .sla
                .compute_deadline(&ticket.organization_id, ticket.priority, now)
                .await?;
            ticket.sla_deadline = Some(deadline);
        }
        activities.push(Activity::change(
            ticket,
            actor_id,
            change.action(),
            json!(change.from),
            json!(change.to),
            now,
        ));
        Ok(Some(change))
    }

    /// Post-commit effects of a status change: re-arm the deadline on reopen
    /// and tell the customer and assignee.
    async fn after_status_change(
        &self,
        ticket: &Ticket,
        change: Option<StatusChange>,
        actor_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> ApiResult<()> {
        let Some(change) = change else {
            return Ok(());
        };
        if change.is_reopen() {
            self.sla.arm_deadline(ticket).await?;
        }
        self.publish(DomainEvent::TicketStatusChanged {
            ticket: ticket.into(),
            old_status: change.from,
            new_status: change.to,
            actor_id: actor_id.map(str::to_string),
            timestamp: now,
        })
        .await;
        Ok(())
    }

    /// Notification failures never undo a committed ticket change.
    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.notifications.dispatch(&event).await {
            tracing::error!("Failed to fan out {}: {}", event.name(), e);
        }
    }

    async fn record_usage(&self, organization_id: &str, dimension: Dimension) {
        if let Err(e) = self.usage.increment_usage(organization_id, dimension, 1).await {
            tracing::warn!(
                "Failed to record {} usage for organization {}: {}",
                dimension,
                organization_id,
                e
            );
        }
    }

    fn validate_batch(ticket_ids: &[String]) -> ApiResult<Vec<String>> {
        if ticket_ids.is_empty() {
            return Err(ApiError::BadRequest("No ticket ids given".to_string()));
        }
        if ticket_ids.len() > MAX_BULK_IDS {
            return Err(ApiError::BadRequest(format!(
                "At most {} tickets per request",
                MAX_BULK_IDS
            )));
        }
        let mut seen = BTreeSet::new();
        Ok(ticket_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect())
    }

    // ========================================
    // Single-ticket operations
    // ========================================

    #[tracing::instrument(skip(self, actor, request), fields(organization_id = %actor.organization_id))]
    pub async fn create_ticket(&self, actor: &Actor, request: CreateTicket) -> ApiResult<Ticket> {
        ensure(actor, Capability::CreateTicket)?;
        request.validate().map_err(ApiError::BadRequest)?;

        let customer_id = match &request.customer_id {
            Some(customer_id) if customer_id != &actor.user_id => {
                if !actor.role.is_staff() {
                    return Err(ApiError::Forbidden(
                        "Customers can only open tickets for themselves".to_string(),
                    ));
                }
                if self
                    .members
                    .find_member(&actor.organization_id, customer_id)
                    .await?
                    .is_none()
                {
                    return Err(ApiError::NotFound(format!(
                        "Customer {} is not a member of this organization",
                        customer_id
                    )));
                }
                customer_id.clone()
            }
            _ => actor.user_id.clone(),
        };

        self.usage
            .ensure_allowed(&actor.organization_id, Dimension::Tickets)
            .await?;

        let now = self.clock.now();
        let mut ticket = Ticket::new(actor.organization_id.clone(), customer_id, &request, now);
        ticket.sla_deadline = Some(
            self.sla
                .compute_deadline(&ticket.organization_id, ticket.priority, now)
                .await?,
        );

        let activity = Activity::new(
            &ticket,
            Some(&actor.user_id),
            ActivityAction::Created,
            json!({
                "priority": ticket.priority,
                "channel": ticket.channel,
                "sla_deadline": ticket.sla_deadline,
            }),
            now,
        );
        let ticket = self.tickets.create_ticket(&ticket, &activity).await?;

        self.sla.arm_deadline(&ticket).await?;
        self.record_usage(&ticket.organization_id, Dimension::Tickets).await;

        tracing::info!(
            "Created ticket #{} ({}) for organization {}",
            ticket.number,
            ticket.id,
            ticket.organization_id
        );
        Ok(ticket)
    }

    pub async fn get_ticket(&self, actor: &Actor, ticket_id: &str) -> ApiResult<Ticket> {
        self.load_for(actor, ticket_id, Capability::ViewTicket).await
    }

    /// Newest first. Customers only ever see their own tickets.
    pub async fn list_tickets(
        &self,
        actor: &Actor,
        mut filter: TicketFilter,
        page: i64,
        per_page: i64,
    ) -> ApiResult<TicketListResponse> {
        ensure(actor, Capability::ViewTicket)?;
        if !actor.role.is_staff() {
            filter.customer_id = Some(actor.user_id.clone());
        }

        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        let offset = (page - 1) * per_page;

        let tickets = self
            .tickets
            .list_tickets(&actor.organization_id, &filter, per_page, offset)
            .await?;
        let total_count = self
            .tickets
            .count_tickets(&actor.organization_id, &filter)
            .await?;
        let total_pages = (total_count + per_page - 1) / per_page;

        Ok(TicketListResponse {
            tickets,
            pagination: PaginationMetadata {
                page,
                per_page,
                total_count,
                total_pages,
            },
        })
    }

    /// General partial update. Status and priority changes each log their own
    /// activity; a changed tag set logs one `tagged` entry.
    #[tracing::instrument(skip(self, actor, request))]
    pub async fn update_ticket(
        &self,
        actor: &Actor,
        ticket_id: &str,
        request: UpdateTicket,
    ) -> ApiResult<Ticket> {
        if request.is_empty() {
            return Err(ApiError::BadRequest("No fields to update".to_string()));
        }
        let mut ticket = self.load_for(actor, ticket_id, Capability::UpdateTicket).await?;
        let now = self.clock.now();
        let actor_id = Some(actor.user_id.as_str());
        let mut activities = Vec::new();
        let mut touched = false;

        if let Some(title) = request.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(ApiError::BadRequest(
                    "Ticket title must not be empty".to_string(),
                ));
            }
            touched |= ticket.title != title;
            ticket.title = title;
        }
        if let Some(description) = request.description {
            touched |= ticket.description != description;
            ticket.description = description;
        }
        if let Some(category) = request.category {
            let category = Some(category).filter(|c| !c.trim().is_empty());
            touched |= ticket.category != category;
            ticket.category = category;
        }

        let status_change = match request.status {
            Some(to) => {
                self.stage_status(&mut ticket, to, actor_id, now, &mut activities)
                    .await?
            }
            None => None,
        };

        if let Some(priority) = request.priority.filter(|p| *p != ticket.priority) {
            activities.push(Activity::change(
                &ticket,
                actor_id,
                ActivityAction::PriorityChanged,
                json!(ticket.priority),
                json!(priority),
                now,
            ));
            ticket.priority = priority;
        }

        if let Some(tags) = request.tags {
            let tags = normalize_tags(&tags);
            if tags != ticket.tags {
                activities.push(Activity::change(
                    &ticket,
                    actor_id,
                    ActivityAction::Tagged,
                    json!(ticket.tags),
                    json!(tags),
                    now,
                ));
                ticket.tags = tags;
            }
        }

        if !touched && activities.is_empty() {
            return Ok(ticket);
        }
        ticket.updated_at = now;

        let reopened = status_change.map_or(false, |c| c.is_reopen());
        self.tickets
            .save_ticket(&ticket, &activities, reopened)
            .await?;
        self.after_status_change(&ticket, status_change, actor_id, now)
            .await?;

        tracing::info!(
            "Updated ticket {} ({} change(s))",
            ticket.id,
            activities.len()
        );
        Ok(ticket)
    }

    async fn transition(
        &self,
        actor: &Actor,
        ticket_id: &str,
        capability: Capability,
        to: TicketStatus,
    ) -> ApiResult<Ticket> {
        let mut ticket = self.load_for(actor, ticket_id, capability).await?;
        let now = self.clock.now();
        let actor_id = Some(actor.user_id.as_str());
        let mut activities = Vec::new();

        let change = self
            .stage_status(&mut ticket, to, actor_id, now, &mut activities)
            .await?;
        if change.is_none() {
            return Ok(ticket);
        }

        let reopened = change.map_or(false, |c| c.is_reopen());
        self.tickets
            .save_ticket(&ticket, &activities, reopened)
            .await?;
        self.after_status_change(&ticket, change, actor_id, now)
            .await?;

        tracing::info!("Ticket {} moved to {}", ticket.id, ticket.status);
        Ok(ticket)
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn resolve_ticket(&self, actor: &Actor, ticket_id: &str) -> ApiResult<Ticket> {
        self.transition(actor, ticket_id, Capability::ResolveTicket, TicketStatus::Resolved)
            .await
    }

    #[tracing::instrument(skip(self, actor))]
    pub async fn close_ticket(&self, actor: &Actor, ticket_id: &str) -> ApiResult<Ticket> {
        self.transition(actor, ticket_id, Capability::CloseTicket, TicketStatus::Closed)
            .await
    }

    /// Closed -> open only. Clears the breach flag and arms a fresh deadline.
    #[tracing::instrument(skip(self, actor))]
    pub async fn reopen_ticket(&self, actor: &Actor, ticket_id: &str) -> ApiResult<Ticket> {
        let ticket = self
            .load_for(actor, ticket_id, Capability::ReopenTicket)
            .await?;
        if ticket.status != TicketStatus::Closed {
            return Err(DomainError::from(TransitionError::NotClosed(ticket.status)).into());
        }
        self.transition(actor, ticket_id, Capability::ReopenTicket, TicketStatus::Open)
            .await
    }

    /// Set or clear the assignee. The first assignment moves an open ticket to
    /// pending; unassigning a pending ticket moves it back to open.
    #[tracing::instrument(skip(self, actor))]
    pub async fn assign_ticket(
        &self,
        actor: &Actor,
        ticket_id: &str,
        assignee_id: Option<String>,
    ) -> ApiResult<Ticket> {
        let mut ticket = self
            .load_for(actor, ticket_id, Capability::AssignTicket)
            .await?;
        if ticket.assignee_id == assignee_id {
            return Ok(ticket);
        }
        if let Some(assignee) = &assignee_id {
            self.ensure_assignable(&ticket.organization_id, assignee)
                .await?;
        }

        let now = self.clock.now();
        let actor_id = Some(actor.user_id.as_str());
        let had_assignee = ticket.assignee_id.is_some();
        let previous = ticket.assignee_id.take();
        ticket.assignee_id = assignee_id.clone();
        ticket.updated_at = now;

        let action = if assignee_id.is_some() {
            ActivityAction::Assigned
        } else {
            ActivityAction::Unassigned
        };
        let mut activities = vec![Activity::change(
            &ticket,
            actor_id,
            action,
            json!(previous),
            json!(assignee_id),
            now,
        )];

        let status_change =
            match assignment_status_effect(ticket.status, had_assignee, assignee_id.is_some()) {
                Some(to) => {
                    self.stage_status(&mut ticket, to, actor_id, now, &mut activities)
                        .await?
                }
                None => None,
            };

        self.tickets.save_ticket(&ticket, &activities, false).await?;

        if let Some(assignee) = assignee_id {
            self.publish(DomainEvent::TicketAssigned {
                ticket: (&ticket).into(),
                assignee_id: assignee,
                actor_id: actor.user_id.clone(),
                timestamp: now,
            })
            .await;
        }
        self.after_status_change(&ticket, status_change, actor_id, now)
            .await?;

        tracing::info!(
            "Ticket {} assignee set to {:?}",
            ticket.id,
            ticket.assignee_id
        );
        Ok(ticket)
    }

    // ========================================
    // Messages and timeline
    // ========================================

    /// Append a message. The first public staff reply satisfies the
    /// first-response SLA.
    #[tracing::instrument(skip(self, actor, request))]
    pub async fn add_message(
        &self,
        actor: &Actor,
        ticket_id: &str,
        request: AddMessage,
    ) -> ApiResult<TicketMessage> {
        let ticket = self
            .load_for(actor, ticket_id, Capability::AddMessage)
            .await?;
        if request.body.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "Message body must not be empty".to_string(),
            ));
        }
        if request.is_internal && !actor.role.is_staff() {
            return Err(ApiError::Forbidden(
                "Only agents can post internal notes".to_string(),
            ));
        }

        self.usage
            .ensure_allowed(&ticket.organization_id, Dimension::Messages)
            .await?;

        let now = self.clock.now();
        let message = TicketMessage::new(
            ticket.id.clone(),
            actor.user_id.clone(),
            request.body,
            request.is_internal,
            now,
        );
        let activity = Activity::new(
            &ticket,
            Some(&actor.user_id),
            ActivityAction::MessageAdded,
            json!({ "message_id": message.id, "is_internal": message.is_internal }),
            now,
        );
        let first_response = (actor.role.is_staff()
            && !message.is_internal
            && ticket.first_response_at.is_none())
        .then_some(now);

        self.tickets
            .add_message(&message, &activity, first_response)
            .await?;
        self.record_usage(&ticket.organization_id, Dimension::Messages)
            .await;

        if first_response.is_some() {
            tracing::info!("First response recorded on ticket {}", ticket.id);
        }
        Ok(message)
    }

    /// Customers do not see internal notes.
    pub async fn list_messages(&self, actor: &Actor, ticket_id: &str) -> ApiResult<Vec<TicketMessage>> {
        self.load_for(actor, ticket_id, Capability::ViewTicket)
            .await?;
        let messages = self.tickets.list_messages(ticket_id).await?;
        if actor.role.is_staff() {
            return Ok(messages);
        }
        Ok(messages.into_iter().filter(|m| !m.is_internal).collect())
    }

    pub async fn get_timeline(&self, actor: &Actor, ticket_id: &str) -> ApiResult<Vec<Activity>> {
        self.load_for(actor, ticket_id, Capability::ViewTicket)
            .await?;
        self.tickets.list_activities(ticket_id).await
    }

    // ========================================
    // Batch operations
    // ========================================

    #[tracing::instrument(skip(self, actor, request), fields(count = request.ticket_ids.len()))]
    pub async fn bulk_update(&self, actor: &Actor, request: BulkUpdate) -> ApiResult<BulkResult> {
        ensure(actor, Capability::BulkUpdate)?;
        let ids = Self::validate_batch(&request.ticket_ids)?;
        if request.status.is_none() && request.priority.is_none() {
            return Err(ApiError::BadRequest(
                "Bulk update needs a status or a priority".to_string(),
            ));
        }

        let mut result = BulkResult::default();
        for id in &ids {
            let update = UpdateTicket {
                status: request.status,
                priority: request.priority,
                ..Default::default()
            };
            result.record(id, self.update_ticket(actor, id, update).await);
        }

        tracing::info!(
            "Bulk update: {} succeeded, {} failed",
            result.success_count,
            result.failure_count
        );
        Ok(result)
    }

    #[tracing::instrument(skip(self, actor, request), fields(count = request.ticket_ids.len()))]
    pub async fn bulk_assign(&self, actor: &Actor, request: BulkAssign) -> ApiResult<BulkResult> {
        ensure(actor, Capability::AssignTicket)?;
        let ids = Self::validate_batch(&request.ticket_ids)?;

        let mut result = BulkResult::default();
        for id in &ids {
            let outcome = self
                .assign_ticket(actor, id, request.assignee_id.clone())
                .await;
            result.record(id, outcome);
        }

        tracing::info!(
            "Bulk assign: {} succeeded, {} failed",
            result.success_count,
            result.failure_count
        );
        Ok(result)
    }

    /// Permanent removal; there is no soft delete.
    #[tracing::instrument(skip(self, actor, request), fields(count = request.ticket_ids.len()))]
    pub async fn bulk_delete(&self, actor: &Actor, request: BulkDelete) -> ApiResult<BulkResult> {
        ensure(actor, Capability::DeleteTickets)?;
        let ids = Self::validate_batch(&request.ticket_ids)?;
        if !request.permanent {
            return Err(ApiError::BadRequest(
                "Ticket deletion must be confirmed with permanent=true".to_string(),
            ));
        }

        let mut result = BulkResult::default();
        for id in &ids {
            result.record(id, self.delete_one(actor, id).await);
        }

        tracing::info!(
            "Bulk delete: {} removed, {} failed",
            result.success_count,
            result.failure_count
        );
        Ok(result)
    }

    async fn delete_one(&self, actor: &Actor, ticket_id: &str) -> ApiResult<()> {
        let ticket = self.load(ticket_id).await?;
        ensure_same_organization(actor, &ticket.organization_id)?;
        if !self.tickets.delete_ticket(ticket_id).await? {
            return Err(ApiError::NotFound(format!("Ticket {} not found", ticket_id)));
        }
        Ok(())
    }

    /// Fold secondaries into `primary_id`: optionally copy their messages, then
    /// close each one with a back-reference. The primary's status is untouched.
    #[tracing::instrument(skip(self, actor, request))]
    pub async fn merge_tickets(
        &self,
        actor: &Actor,
        primary_id: &str,
        request: MergeTickets,
    ) -> ApiResult<BulkResult> {
        ensure(actor, Capability::MergeTickets)?;
        let ids = Self::validate_batch(&request.secondary_ticket_ids)?;
        if ids.iter().any(|id| id == primary_id) {
            return Err(ApiError::BadRequest(
                "A ticket cannot be merged into itself".to_string(),
            ));
        }
        let primary = self
            .load_for(actor, primary_id, Capability::MergeTickets)
            .await?;

        let mut result = BulkResult::default();
        for id in &ids {
            let outcome = self
                .merge_one(actor, &primary, id, request.merge_comments)
                .await;
            result.record(id, outcome);
        }

        tracing::info!(
            "Merged {} ticket(s) into {} ({} failed)",
            result.success_count,
            primary.id,
            result.failure_count
        );
        Ok(result)
    }

    async fn merge_one(
        &self,
        actor: &Actor,
        primary: &Ticket,
        secondary_id: &str,
        merge_comments: bool,
    ) -> ApiResult<()> {
        let mut secondary = self
            .load_for(actor, secondary_id, Capability::MergeTickets)
            .await?;
        if secondary.merged_into_id.is_some() {
            return Err(ApiError::Conflict(format!(
                "Ticket {} was already merged",
                secondary_id
            )));
        }

        let copies: Vec<TicketMessage> = if merge_comments {
            self.tickets
                .list_messages(&secondary.id)
                .await?
                .iter()
                .map(|m| m.copy_to(&primary.id))
                .collect()
        } else {
            Vec::new()
        };

        let now = self.clock.now();
        let actor_id = Some(actor.user_id.as_str());
        let previous_status = secondary.status;
        let change = force_close(&mut secondary, now);
        secondary.merged_into_id = Some(primary.id.clone());
        secondary.updated_at = now;

        let activity = Activity::new(
            &secondary,
            actor_id,
            ActivityAction::Closed,
            json!({
                "from": previous_status,
                "to": TicketStatus::Closed,
                "merged_into": primary.id,
            }),
            now,
        );
        self.tickets
            .merge_ticket(&secondary, &copies, &activity)
            .await?;
        self.after_status_change(&secondary, change, actor_id, now)
            .await?;
        Ok(())
    }
}
