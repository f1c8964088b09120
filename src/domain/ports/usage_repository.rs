use crate::domain::entities::UsageRecord;
use crate::infrastructure::http::middleware::error::ApiResult;

#[async_trait::async_trait]
pub trait UsageRepository: Send + Sync {
    async fn get_current_usage(&self, organization_id: &str) -> ApiResult<Option<UsageRecord>>;

    /// Insert a record as the current one. Returns false when another current
    /// record already exists.
    async fn insert_current_usage(&self, record: &UsageRecord) -> ApiResult<bool>;

    /// Compare-and-swap write keyed on `record.version`. Returns false when the
    /// row changed since it was read; the stored version is bumped on success.
    async fn save_usage(&self, record: &UsageRecord) -> ApiResult<bool>;

    /// All records for the organization, newest period first
    async fn list_usage_history(&self, organization_id: &str) -> ApiResult<Vec<UsageRecord>>;
}
