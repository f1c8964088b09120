use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::application::services::NotificationService;
use crate::domain::entities::{
    Activity, ActivityAction, Actor, BreachOutcome, CreateSlaPolicy, JobKind, Priority,
    SlaCheckPayload, SlaDefaults, SlaPolicy, Ticket,
};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{
    sla_repository::SlaRepository, task_queue::TaskQueue, ticket_repository::TicketRepository,
    time_service::TimeService,
};
use crate::domain::services::{
    breach_decision, compute_deadline, ensure, ensure_same_organization, Capability,
};
use crate::infrastructure::http::middleware::error::{ApiError, ApiResult};
use crate::shared::at_storage_precision;

#[derive(Clone)]
pub struct SlaService {
    sla_repo: Arc<dyn SlaRepository>,
    ticket_repo: Arc<dyn TicketRepository>,
    queue: Arc<dyn TaskQueue>,
    notifications: NotificationService,
    clock: Arc<dyn TimeService>,
    defaults: SlaDefaults,
}

impl SlaService {
    pub fn new(
        sla_repo: Arc<dyn SlaRepository>,
        ticket_repo: Arc<dyn TicketRepository>,
        queue: Arc<dyn TaskQueue>,
        notifications: NotificationService,
        clock: Arc<dyn TimeService>,
        defaults: SlaDefaults,
    ) -> Self {
        Self {
            sla_repo,
            ticket_repo,
            queue,
            notifications,
            clock,
            defaults,
        }
    }

    // ========================================
    // Policy management
    // ========================================

    #[tracing::instrument(skip(self, request), fields(organization_id = %actor.organization_id))]
    pub async fn create_policy(&self, actor: &Actor, request: CreateSlaPolicy) -> ApiResult<SlaPolicy> {
        ensure(actor, Capability::ManageSlaPolicies)?;
        request.validate().map_err(ApiError::BadRequest)?;

        let policy = SlaPolicy::new(actor.organization_id.clone(), request, self.clock.now());
        self.sla_repo.create_sla_policy(&policy).await?;

        tracing::info!(
            "Created SLA policy '{}' for {} priority ({} min first response)",
            policy.name,
            policy.priority,
            policy.first_response_minutes
        );
        Ok(policy)
    }

    pub async fn list_policies(&self, actor: &Actor) -> ApiResult<Vec<SlaPolicy>> {
        if !actor.role.is_staff() {
            return Err(ApiError::Forbidden(
                "Only agents and admins can view SLA policies".to_string(),
            ));
        }
        self.sla_repo
            .list_sla_policies(&actor.organization_id)
            .await
    }

    pub async fn delete_policy(&self, actor: &Actor, policy_id: &str) -> ApiResult<()> {
        ensure(actor, Capability::ManageSlaPolicies)?;

        let policy = self
            .sla_repo
            .get_sla_policy(policy_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("SLA policy {} not found", policy_id)))?;
        ensure_same_organization(actor, &policy.organization_id)?;

        self.sla_repo.delete_sla_policy(policy_id).await?;
        tracing::info!("Deleted SLA policy {}", policy_id);
        Ok(())
    }

    // ========================================
    // Deadlines
    // ========================================

    /// First-response deadline for a ticket of `priority` starting at `from`.
    pub async fn compute_deadline(
        &self,
        organization_id: &str,
        priority: Priority,
        from: DateTime<Utc>,
    ) -> ApiResult<DateTime<Utc>> {
        let policy = self
            .sla_repo
            .find_default_policy(organization_id, priority)
            .await?;
        Ok(compute_deadline(policy.as_ref(), priority, &self.defaults, from))
    }

    /// Schedule the deferred breach check for the ticket's current deadline.
    pub async fn arm_deadline(&self, ticket: &Ticket) -> ApiResult<()> {
        let Some(deadline) = ticket.sla_deadline else {
            return Ok(());
        };
        self.schedule_check(ticket, deadline, deadline).await
    }

    async fn schedule_check(
        &self,
        ticket: &Ticket,
        deadline: DateTime<Utc>,
        run_at: DateTime<Utc>,
    ) -> ApiResult<()> {
        let payload = SlaCheckPayload {
            ticket_id: ticket.id.clone(),
            organization_id: ticket.organization_id.clone(),
            deadline,
        };
        self.queue
            .enqueue_at(
                JobKind::SlaCheck,
                Some(&ticket.organization_id),
                serde_json::to_value(&payload)?,
                run_at,
            )
            .await?;
        tracing::debug!("Armed SLA check for ticket {} at {}", ticket.id, run_at);
        Ok(())
    }

    async fn dispatch_breach(&self, ticket: &Ticket, deadline: DateTime<Utc>, now: DateTime<Utc>) -> ApiResult<()> {
        let event = DomainEvent::SlaBreached {
            ticket: ticket.into(),
            deadline,
            breached_at: now,
        };
        self.notifications.dispatch(&event).await?;
        Ok(())
    }

    /// Body of the deferred check. Reloads the ticket and decides from stored
    /// state only; the one-way flag flip gates the activity and fan-out.
    #[tracing::instrument(skip(self, payload), fields(ticket_id = %payload.ticket_id))]
    pub async fn check_breach(&self, payload: &SlaCheckPayload) -> ApiResult<BreachOutcome> {
        let Some(mut ticket) = self.ticket_repo.get_ticket(&payload.ticket_id).await? else {
            tracing::debug!("Ticket no longer exists, SLA check dropped");
            return Ok(BreachOutcome::TicketGone);
        };
        let now = self.clock.now();
        let armed_for = at_storage_precision(payload.deadline);

        match breach_decision(&ticket, now) {
            BreachOutcome::Breached => {}
            BreachOutcome::NotDue => {
                // Fired at the exact deadline instant: look again just after it
                if ticket.sla_deadline == Some(armed_for) {
                    self.schedule_check(&ticket, armed_for, armed_for + Duration::seconds(1))
                        .await?;
                }
                tracing::debug!("Deadline not passed, SLA check is a no-op");
                return Ok(BreachOutcome::NotDue);
            }
            outcome => {
                // A previous firing flipped the flag but may have died before
                // fanning out; redispatching is absorbed by the dedupe keys.
                if ticket.sla_breached && ticket.sla_deadline == Some(armed_for) {
                    self.dispatch_breach(&ticket, armed_for, now).await?;
                }
                tracing::debug!("SLA check no longer applies");
                return Ok(outcome);
            }
        }

        let deadline = ticket.sla_deadline.unwrap_or(armed_for);
        let activity = Activity::new(
            &ticket,
            None,
            ActivityAction::SlaBreached,
            serde_json::json!({ "deadline": deadline }),
            now,
        );
        if !self
            .ticket_repo
            .mark_sla_breached(&ticket.id, &activity)
            .await?
        {
            tracing::debug!("Ticket changed before the breach could be recorded");
            return Ok(BreachOutcome::NotApplicable);
        }
        ticket.sla_breached = true;

        metrics::counter!("sla_breaches_total").increment(1);
        tracing::info!(
            "Ticket #{} in organization {} breached its SLA (deadline {})",
            ticket.number,
            ticket.organization_id,
            deadline
        );

        self.dispatch_breach(&ticket, deadline, now).await?;
        Ok(BreachOutcome::Breached)
    }
}
