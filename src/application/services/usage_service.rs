use std::sync::Arc;

use crate::application::services::subscription_service::LEDGER_WRITE_ATTEMPTS;
use crate::application::services::{NotificationService, SubscriptionService};
use crate::domain::entities::{
    Dimension, QuotaCheck, Subscription, UsageRecord, PlanLimits, UPGRADE_REQUIRED,
};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{time_service::TimeService, usage_repository::UsageRepository};
use crate::domain::services::{apply_increment, evaluate};
use crate::infrastructure::http::middleware::error::{ApiError, ApiResult};

/// Per-organization ledger and quota decisions
#[derive(Clone)]
pub struct UsageService {
    usage_repo: Arc<dyn UsageRepository>,
    subscriptions: SubscriptionService,
    notifications: NotificationService,
    clock: Arc<dyn TimeService>,
}

impl UsageService {
    pub fn new(
        usage_repo: Arc<dyn UsageRepository>,
        subscriptions: SubscriptionService,
        notifications: NotificationService,
        clock: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            usage_repo,
            subscriptions,
            notifications,
            clock,
        }
    }

    /// Current record, initializing one from the subscription's plan when it
    /// is missing.
    async fn current_or_init(
        &self,
        subscription: &Subscription,
        limits: &PlanLimits,
    ) -> ApiResult<UsageRecord> {
        let organization_id = &subscription.organization_id;
        for _ in 0..LEDGER_WRITE_ATTEMPTS {
            if let Some(record) = self.usage_repo.get_current_usage(organization_id).await? {
                return Ok(record);
            }
            let fresh = UsageRecord::fresh(
                organization_id.clone(),
                subscription.id.clone(),
                subscription.current_period_start,
                subscription.current_period_end,
                limits,
                0,
                self.clock.now(),
            );
            if self.usage_repo.insert_current_usage(&fresh).await? {
                tracing::warn!(
                    "Usage record for organization {} was missing and has been initialized",
                    organization_id
                );
                return Ok(fresh);
            }
        }
        Err(ApiError::Conflict(
            "Usage record is being initialized concurrently, try again".to_string(),
        ))
    }

    #[tracing::instrument(skip(self))]
    pub async fn check_limit(&self, organization_id: &str, dimension: Dimension) -> ApiResult<QuotaCheck> {
        let now = self.clock.now();
        let Some((_, plan)) = self.subscriptions.entitlement(organization_id).await? else {
            return Ok(evaluate(None, None, dimension, now));
        };
        let record = self.usage_repo.get_current_usage(organization_id).await?;
        Ok(evaluate(Some(&plan), record.as_ref(), dimension, now))
    }

    /// Quota gate run before an operation; a denial surfaces as `QuotaExceeded`.
    pub async fn ensure_allowed(&self, organization_id: &str, dimension: Dimension) -> ApiResult<QuotaCheck> {
        let check = self.check_limit(organization_id, dimension).await?;
        if check.allowed {
            return Ok(check);
        }

        metrics::counter!("quota_denied_total", "dimension" => dimension.as_str()).increment(1);
        tracing::info!(
            "Quota denied for organization {} on {}: {:?}",
            organization_id,
            dimension,
            check.reason
        );

        let message = if check.reason.as_deref() == Some(UPGRADE_REQUIRED) {
            "No active subscription; upgrade required".to_string()
        } else {
            format!(
                "{} limit reached ({}/{}); upgrade your plan for more",
                dimension, check.current, check.limit
            )
        };
        Err(ApiError::QuotaExceeded(message))
    }

    /// Add `amount` to a dimension of the current record. The write is
    /// version-checked and retried; a threshold alert is stamped in the same
    /// write and dispatched once per period.
    #[tracing::instrument(skip(self))]
    pub async fn increment_usage(
        &self,
        organization_id: &str,
        dimension: Dimension,
        amount: i64,
    ) -> ApiResult<UsageRecord> {
        if amount <= 0 {
            return Err(ApiError::BadRequest(
                "Usage increment must be positive".to_string(),
            ));
        }

        let (subscription, plan) = self
            .subscriptions
            .entitlement(organization_id)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "Organization {} has no active subscription",
                    organization_id
                ))
            })?;

        for _ in 0..LEDGER_WRITE_ATTEMPTS {
            let mut record = self.current_or_init(&subscription, &plan.limits).await?;
            let now = self.clock.now();

            apply_increment(&mut record, &plan.limits, dimension, amount, now);

            let check = evaluate(Some(&plan), Some(&record), dimension, now);
            let alert = check.should_alert && record.alert_sent_at(dimension).is_none();
            if alert {
                record.mark_alert_sent(dimension, now);
            }

            if !self.usage_repo.save_usage(&record).await? {
                tracing::debug!("Usage record for {} changed concurrently, retrying", organization_id);
                continue;
            }
            record.version += 1;

            if alert {
                let event = DomainEvent::UsageThresholdReached {
                    organization_id: organization_id.to_string(),
                    dimension,
                    percent_used: check.percent_used,
                    period_start: record.period_start,
                    timestamp: now,
                };
                if let Err(e) = self.notifications.dispatch(&event).await {
                    tracing::error!("Failed to dispatch usage alert for {}: {}", organization_id, e);
                }
            }
            return Ok(record);
        }

        Err(ApiError::Conflict(
            "Usage record is being updated concurrently, try again".to_string(),
        ))
    }

    pub async fn current_usage(&self, organization_id: &str) -> ApiResult<UsageRecord> {
        match self.subscriptions.entitlement(organization_id).await? {
            Some((subscription, plan)) => self.current_or_init(&subscription, &plan.limits).await,
            None => self
                .usage_repo
                .get_current_usage(organization_id)
                .await?
                .ok_or_else(|| {
                    ApiError::NotFound(format!(
                        "No usage recorded for organization {}",
                        organization_id
                    ))
                }),
        }
    }

    pub async fn usage_history(&self, organization_id: &str) -> ApiResult<Vec<UsageRecord>> {
        self.usage_repo.list_usage_history(organization_id).await
    }

    pub async fn reset_usage(&self, organization_id: &str) -> ApiResult<UsageRecord> {
        self.subscriptions
            .reset_usage_for_new_period(organization_id)
            .await
    }
}
