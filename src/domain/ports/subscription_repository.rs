use crate::domain::entities::{Subscription, UsageRecord};
use crate::infrastructure::http::middleware::error::ApiResult;

#[async_trait::async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert the binding together with its first usage record.
    async fn create_subscription(
        &self,
        subscription: &Subscription,
        usage: &UsageRecord,
    ) -> ApiResult<()>;

    /// The organization's non-canceled subscription, if any
    async fn get_live_subscription(&self, organization_id: &str)
        -> ApiResult<Option<Subscription>>;

    /// Most recent subscription regardless of status
    async fn get_latest_subscription(
        &self,
        organization_id: &str,
    ) -> ApiResult<Option<Subscription>>;

    async fn update_subscription(&self, subscription: &Subscription) -> ApiResult<()>;

    /// Persist a plan switch and the reconciled usage record atomically. The
    /// usage write is version-checked; false means nothing was written.
    async fn apply_plan_change(
        &self,
        subscription: &Subscription,
        usage: &UsageRecord,
    ) -> ApiResult<bool>;

    /// Advance the period: retire the current usage record, insert `fresh` as
    /// the new current one and store the updated subscription, atomically.
    async fn roll_period(&self, subscription: &Subscription, fresh: &UsageRecord)
        -> ApiResult<()>;
}
