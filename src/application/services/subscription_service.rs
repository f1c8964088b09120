use serde::Serialize;
use std::sync::Arc;

use crate::domain::entities::{
    JobKind, PeriodRolloverPayload, Plan, PlanCatalog, PlanChange, Subscription,
    SubscriptionStatus, UsageRecord,
};
use crate::domain::ports::{
    subscription_repository::SubscriptionRepository, task_queue::TaskQueue,
    time_service::TimeService, usage_repository::UsageRepository,
};
use crate::domain::services::{billing_period_from, reconcile_plan_change};
use crate::infrastructure::http::middleware::error::{ApiError, ApiResult};
use crate::shared::at_storage_precision;

/// Attempts at a version-checked ledger write before reporting contention
pub(crate) const LEDGER_WRITE_ATTEMPTS: usize = 5;

/// What a fired rollover job did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverOutcome {
    /// A fresh period and usage record were started
    Rolled,
    /// The subscription was set to cancel at period end and is now canceled
    Canceled,
    /// The period has not ended yet
    NotDue,
    /// The subscription is gone, canceled, or already moved to another period
    Stale,
}

#[derive(Clone)]
pub struct SubscriptionService {
    subscriptions: Arc<dyn SubscriptionRepository>,
    usage_repo: Arc<dyn UsageRepository>,
    queue: Arc<dyn TaskQueue>,
    catalog: Arc<PlanCatalog>,
    clock: Arc<dyn TimeService>,
}

impl SubscriptionService {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        usage_repo: Arc<dyn UsageRepository>,
        queue: Arc<dyn TaskQueue>,
        catalog: Arc<PlanCatalog>,
        clock: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            subscriptions,
            usage_repo,
            queue,
            catalog,
            clock,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    fn plan_for(&self, subscription: &Subscription) -> ApiResult<&Plan> {
        self.catalog.get(&subscription.plan_id).ok_or_else(|| {
            ApiError::Internal(format!(
                "Subscription {} references unknown plan {}",
                subscription.id, subscription.plan_id
            ))
        })
    }

    async fn live_subscription(&self, organization_id: &str) -> ApiResult<Subscription> {
        self.subscriptions
            .get_live_subscription(organization_id)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "Organization {} has no subscription",
                    organization_id
                ))
            })
    }

    async fn carried_storage(&self, organization_id: &str) -> ApiResult<i64> {
        Ok(self
            .usage_repo
            .get_current_usage(organization_id)
            .await?
            .map(|r| r.storage_used_mb)
            .unwrap_or(0))
    }

    async fn arm_rollover(&self, subscription: &Subscription) -> ApiResult<()> {
        let payload = PeriodRolloverPayload {
            organization_id: subscription.organization_id.clone(),
            subscription_id: subscription.id.clone(),
            period_end: subscription.current_period_end,
        };
        self.queue
            .enqueue_at(
                JobKind::UsagePeriodRollover,
                Some(&subscription.organization_id),
                serde_json::to_value(&payload)?,
                subscription.current_period_end,
            )
            .await?;
        Ok(())
    }

    /// The live subscription and its plan, when the subscription's status
    /// entitles the organization to the plan's quota.
    pub async fn entitlement(&self, organization_id: &str) -> ApiResult<Option<(Subscription, Plan)>> {
        let Some(subscription) = self
            .subscriptions
            .get_live_subscription(organization_id)
            .await?
        else {
            return Ok(None);
        };
        if !subscription.status.is_entitled() {
            return Ok(None);
        }
        let plan = self.plan_for(&subscription)?.clone();
        Ok(Some((subscription, plan)))
    }

    /// Bind the organization to a plan (the catalog default when `plan_id` is
    /// `None`), open the first period and arm its rollover.
    #[tracing::instrument(skip(self))]
    pub async fn subscribe(
        &self,
        organization_id: &str,
        plan_id: Option<&str>,
    ) -> ApiResult<Subscription> {
        let plan = match plan_id {
            Some(id) => self
                .catalog
                .get_active(id)
                .ok_or_else(|| ApiError::NotFound(format!("Plan {} not found", id)))?,
            None => self
                .catalog
                .default_plan()
                .ok_or_else(|| ApiError::Internal("No default plan configured".to_string()))?,
        };

        if self
            .subscriptions
            .get_live_subscription(organization_id)
            .await?
            .is_some()
        {
            return Err(ApiError::Conflict(
                "Organization already has a live subscription".to_string(),
            ));
        }

        let now = self.clock.now();
        let period = billing_period_from(now);
        let subscription = Subscription {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            plan_id: plan.id.clone(),
            previous_plan_id: None,
            status: SubscriptionStatus::Active,
            current_period_start: period.start,
            current_period_end: period.end,
            cancel_at_period_end: false,
            canceled_at: None,
            created_at: now,
            updated_at: now,
        };
        let usage = UsageRecord::fresh(
            organization_id.to_string(),
            subscription.id.clone(),
            period.start,
            period.end,
            &plan.limits,
            self.carried_storage(organization_id).await?,
            now,
        );

        self.subscriptions
            .create_subscription(&subscription, &usage)
            .await?;
        self.arm_rollover(&subscription).await?;

        tracing::info!(
            "Organization {} subscribed to plan {} until {}",
            organization_id,
            plan.id,
            subscription.current_period_end
        );
        Ok(subscription)
    }

    pub async fn get_subscription(&self, organization_id: &str) -> ApiResult<Subscription> {
        self.live_subscription(organization_id).await
    }

    /// Switch plans mid-period and redistribute the remaining balances.
    #[tracing::instrument(skip(self))]
    pub async fn change_plan(&self, organization_id: &str, new_plan_id: &str) -> ApiResult<PlanChange> {
        let mut subscription = self.live_subscription(organization_id).await?;
        if subscription.plan_id == new_plan_id {
            return Err(ApiError::BadRequest(format!(
                "Organization is already on plan {}",
                new_plan_id
            )));
        }

        let new_plan = self
            .catalog
            .get_active(new_plan_id)
            .ok_or_else(|| ApiError::NotFound(format!("Plan {} not found", new_plan_id)))?;
        let old_plan = self.plan_for(&subscription)?;
        let is_upgrade = new_plan.is_upgrade_from(old_plan);

        let now = self.clock.now();
        subscription.previous_plan_id = Some(old_plan.id.clone());
        subscription.plan_id = new_plan.id.clone();
        subscription.updated_at = now;

        for _ in 0..LEDGER_WRITE_ATTEMPTS {
            let mut usage = match self.usage_repo.get_current_usage(organization_id).await? {
                Some(record) => record,
                None => {
                    let fresh = UsageRecord::fresh(
                        organization_id.to_string(),
                        subscription.id.clone(),
                        subscription.current_period_start,
                        subscription.current_period_end,
                        &old_plan.limits,
                        0,
                        now,
                    );
                    self.usage_repo.insert_current_usage(&fresh).await?;
                    continue;
                }
            };

            reconcile_plan_change(&mut usage, &old_plan.limits, &new_plan.limits, is_upgrade, now);

            if self
                .subscriptions
                .apply_plan_change(&subscription, &usage)
                .await?
            {
                usage.version += 1;
                tracing::info!(
                    "Organization {} moved from plan {} to {} ({})",
                    organization_id,
                    old_plan.id,
                    new_plan.id,
                    if is_upgrade { "upgrade" } else { "downgrade" }
                );
                return Ok(PlanChange {
                    organization_id: organization_id.to_string(),
                    old_plan_id: old_plan.id.clone(),
                    new_plan_id: new_plan.id.clone(),
                    is_upgrade,
                    usage,
                });
            }
            tracing::debug!("Usage record for {} changed underneath plan change, retrying", organization_id);
        }

        Err(ApiError::Conflict(
            "Usage record is being updated concurrently, try again".to_string(),
        ))
    }

    /// Cancel now, or flag the subscription to end with its current period.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, organization_id: &str, at_period_end: bool) -> ApiResult<Subscription> {
        let mut subscription = self.live_subscription(organization_id).await?;
        let now = self.clock.now();

        if at_period_end {
            subscription.cancel_at_period_end = true;
        } else {
            subscription.status = SubscriptionStatus::Canceled;
            subscription.canceled_at = Some(now);
            subscription.cancel_at_period_end = false;
        }
        subscription.updated_at = now;
        self.subscriptions.update_subscription(&subscription).await?;

        tracing::info!(
            "Subscription {} canceled{}",
            subscription.id,
            if at_period_end { " at period end" } else { "" }
        );
        Ok(subscription)
    }

    /// Undo a pending cancel-at-period-end, or revive an immediately canceled
    /// subscription with a fresh period.
    #[tracing::instrument(skip(self))]
    pub async fn reactivate(&self, organization_id: &str) -> ApiResult<Subscription> {
        let now = self.clock.now();

        if let Some(mut live) = self
            .subscriptions
            .get_live_subscription(organization_id)
            .await?
        {
            if !live.cancel_at_period_end {
                return Err(ApiError::Conflict(
                    "Subscription is not scheduled for cancellation".to_string(),
                ));
            }
            live.cancel_at_period_end = false;
            live.updated_at = now;
            self.subscriptions.update_subscription(&live).await?;
            tracing::info!("Subscription {} will renew", live.id);
            return Ok(live);
        }

        let mut subscription = self
            .subscriptions
            .get_latest_subscription(organization_id)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "Organization {} has no subscription",
                    organization_id
                ))
            })?;

        let plan = self.plan_for(&subscription)?;
        let period = billing_period_from(now);
        subscription.status = SubscriptionStatus::Active;
        subscription.canceled_at = None;
        subscription.cancel_at_period_end = false;
        subscription.current_period_start = period.start;
        subscription.current_period_end = period.end;
        subscription.updated_at = now;

        let fresh = UsageRecord::fresh(
            organization_id.to_string(),
            subscription.id.clone(),
            period.start,
            period.end,
            &plan.limits,
            self.carried_storage(organization_id).await?,
            now,
        );
        self.subscriptions.roll_period(&subscription, &fresh).await?;
        self.arm_rollover(&subscription).await?;

        tracing::info!("Subscription {} reactivated", subscription.id);
        Ok(subscription)
    }

    /// Start a new period one month from now with a zeroed ledger built from
    /// the current plan's limits. Storage is carried over.
    #[tracing::instrument(skip(self))]
    pub async fn reset_usage_for_new_period(&self, organization_id: &str) -> ApiResult<UsageRecord> {
        let mut subscription = self.live_subscription(organization_id).await?;
        let plan = self.plan_for(&subscription)?;
        let now = self.clock.now();
        let period = billing_period_from(now);

        subscription.current_period_start = period.start;
        subscription.current_period_end = period.end;
        subscription.updated_at = now;

        let fresh = UsageRecord::fresh(
            organization_id.to_string(),
            subscription.id.clone(),
            period.start,
            period.end,
            &plan.limits,
            self.carried_storage(organization_id).await?,
            now,
        );
        self.subscriptions.roll_period(&subscription, &fresh).await?;
        self.arm_rollover(&subscription).await?;

        tracing::info!(
            "Usage for organization {} reset, period now ends {}",
            organization_id,
            period.end
        );
        Ok(fresh)
    }

    /// Body of the deferred rollover job. Re-derives everything from stored
    /// state, so stale or repeated firings do nothing.
    #[tracing::instrument(skip(self, payload), fields(organization_id = %payload.organization_id))]
    pub async fn handle_period_rollover(
        &self,
        payload: &PeriodRolloverPayload,
    ) -> ApiResult<RolloverOutcome> {
        let Some(mut subscription) = self
            .subscriptions
            .get_live_subscription(&payload.organization_id)
            .await?
        else {
            tracing::debug!("No live subscription, rollover skipped");
            return Ok(RolloverOutcome::Stale);
        };

        if subscription.id != payload.subscription_id
            || subscription.current_period_end != at_storage_precision(payload.period_end)
        {
            tracing::debug!("Rollover job is stale, skipping");
            return Ok(RolloverOutcome::Stale);
        }

        let now = self.clock.now();
        if now < subscription.current_period_end {
            tracing::debug!("Period ends {}, not due yet", subscription.current_period_end);
            self.arm_rollover(&subscription).await?;
            return Ok(RolloverOutcome::NotDue);
        }

        if subscription.cancel_at_period_end {
            subscription.status = SubscriptionStatus::Canceled;
            subscription.canceled_at = Some(now);
            subscription.cancel_at_period_end = false;
            subscription.updated_at = now;
            self.subscriptions.update_subscription(&subscription).await?;
            tracing::info!("Subscription {} ended at period end", subscription.id);
            return Ok(RolloverOutcome::Canceled);
        }

        self.reset_usage_for_new_period(&payload.organization_id)
            .await?;
        Ok(RolloverOutcome::Rolled)
    }
}
