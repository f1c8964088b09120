use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::domain::entities::{JobKind, NotificationKind, OutboundNotification, Role};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{
    member_directory::MemberDirectory, notification_sink::NotificationSink, task_queue::TaskQueue,
};
use crate::infrastructure::http::middleware::error::ApiResult;
use crate::shared::to_db_timestamp;

/// Turns domain events into one deferred delivery job per recipient.
///
/// Dedupe keys are derived from the event alone, so dispatching the same event
/// twice still reaches each recipient at most once.
#[derive(Clone)]
pub struct NotificationService {
    members: Arc<dyn MemberDirectory>,
    queue: Arc<dyn TaskQueue>,
    sink: Arc<dyn NotificationSink>,
}

/// Who hears about an event and what they are told
struct Fanout {
    kind: NotificationKind,
    title: String,
    message: String,
    context: serde_json::Value,
    dedupe_base: String,
    recipients: Vec<String>,
    actor_id: Option<String>,
}

impl NotificationService {
    pub fn new(
        members: Arc<dyn MemberDirectory>,
        queue: Arc<dyn TaskQueue>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            members,
            queue,
            sink,
        }
    }

    async fn admin_ids(&self, organization_id: &str) -> ApiResult<Vec<String>> {
        Ok(self
            .members
            .list_members_with_role(organization_id, Role::Admin)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect())
    }

    async fn fanout_for(&self, event: &DomainEvent) -> ApiResult<Fanout> {
        let fanout = match event {
            DomainEvent::SlaBreached {
                ticket,
                deadline,
                breached_at,
            } => {
                let mut recipients = self.admin_ids(&ticket.organization_id).await?;
                recipients.extend(ticket.assignee_id.clone());
                Fanout {
                    kind: NotificationKind::SlaBreached,
                    title: format!("SLA breached on ticket #{}", ticket.number),
                    message: format!(
                        "Ticket #{} \"{}\" missed its first-response deadline",
                        ticket.number, ticket.title
                    ),
                    context: json!({
                        "ticket_id": ticket.id,
                        "deadline": deadline,
                        "breached_at": breached_at,
                    }),
                    dedupe_base: format!("sla_breached:{}:{}", ticket.id, to_db_timestamp(*deadline)),
                    recipients,
                    actor_id: None,
                }
            }
            DomainEvent::TicketAssigned {
                ticket,
                assignee_id,
                actor_id,
                timestamp,
            } => Fanout {
                kind: NotificationKind::TicketAssigned,
                title: format!("Ticket #{} assigned to you", ticket.number),
                message: ticket.title.clone(),
                context: json!({ "ticket_id": ticket.id, "assigned_by": actor_id }),
                dedupe_base: format!(
                    "ticket_assigned:{}:{}:{}",
                    ticket.id,
                    assignee_id,
                    to_db_timestamp(*timestamp)
                ),
                recipients: vec![assignee_id.clone()],
                actor_id: Some(actor_id.clone()),
            },
            DomainEvent::TicketStatusChanged {
                ticket,
                old_status,
                new_status,
                actor_id,
                timestamp,
            } => {
                let mut recipients = vec![ticket.customer_id.clone()];
                recipients.extend(ticket.assignee_id.clone());
                Fanout {
                    kind: NotificationKind::TicketStatusChanged,
                    title: format!("Ticket #{} is now {}", ticket.number, new_status),
                    message: format!(
                        "\"{}\" moved from {} to {}",
                        ticket.title, old_status, new_status
                    ),
                    context: json!({
                        "ticket_id": ticket.id,
                        "from": old_status,
                        "to": new_status,
                    }),
                    dedupe_base: format!(
                        "ticket_status_changed:{}:{}:{}",
                        ticket.id,
                        new_status,
                        to_db_timestamp(*timestamp)
                    ),
                    recipients,
                    actor_id: actor_id.clone(),
                }
            }
            DomainEvent::UsageThresholdReached {
                organization_id,
                dimension,
                percent_used,
                period_start,
                ..
            } => Fanout {
                kind: NotificationKind::UsageAlert,
                title: format!("{}% of your {} quota used", percent_used, dimension),
                message: format!(
                    "Your organization has used {}% of its {} allowance for this billing period",
                    percent_used, dimension
                ),
                context: json!({
                    "dimension": dimension,
                    "percent_used": percent_used,
                    "period_start": period_start,
                }),
                dedupe_base: format!(
                    "usage_alert:{}:{}:{}",
                    organization_id,
                    dimension,
                    to_db_timestamp(*period_start)
                ),
                recipients: self.admin_ids(organization_id).await?,
                actor_id: None,
            },
        };
        Ok(fanout)
    }

    /// Enqueue one delivery job per distinct recipient, excluding whoever
    /// caused the event. Returns how many jobs were enqueued.
    #[tracing::instrument(skip(self, event), fields(event = event.name()))]
    pub async fn dispatch(&self, event: &DomainEvent) -> ApiResult<usize> {
        let fanout = self.fanout_for(event).await?;
        let organization_id = event.organization_id();

        let recipients: BTreeSet<String> = fanout
            .recipients
            .into_iter()
            .filter(|r| fanout.actor_id.as_deref() != Some(r.as_str()))
            .collect();

        for recipient in &recipients {
            let notification = OutboundNotification {
                recipient_user_id: recipient.clone(),
                organization_id: organization_id.to_string(),
                kind: fanout.kind,
                title: fanout.title.clone(),
                message: fanout.message.clone(),
                context: fanout.context.clone(),
                dedupe_key: format!("{}:{}", fanout.dedupe_base, recipient),
            };
            self.queue
                .enqueue(
                    JobKind::DeliverNotification,
                    Some(organization_id),
                    serde_json::to_value(&notification)?,
                )
                .await?;
        }

        tracing::debug!(
            "Fanned out {} to {} recipient(s)",
            event.name(),
            recipients.len()
        );
        Ok(recipients.len())
    }

    /// Hand one notification to the sink. Redeliveries are absorbed by the
    /// sink's dedupe key.
    pub async fn deliver(&self, notification: &OutboundNotification) -> ApiResult<bool> {
        let delivered = self.sink.deliver(notification).await?;
        if delivered {
            metrics::counter!("notifications_dispatched_total", "kind" => notification.kind.as_str())
                .increment(1);
            tracing::info!(
                "Delivered {} notification to {}",
                notification.kind,
                notification.recipient_user_id
            );
        } else {
            tracing::debug!(
                "Notification {} already delivered, skipping",
                notification.dedupe_key
            );
        }
        Ok(delivered)
    }
}
