use crate::domain::entities::{Priority, SlaPolicy};
use crate::infrastructure::http::middleware::error::ApiResult;

/// Repository for SLA policies
#[async_trait::async_trait]
pub trait SlaRepository: Send + Sync {
    async fn create_sla_policy(&self, policy: &SlaPolicy) -> ApiResult<()>;
    async fn get_sla_policy(&self, policy_id: &str) -> ApiResult<Option<SlaPolicy>>;
    async fn list_sla_policies(&self, organization_id: &str) -> ApiResult<Vec<SlaPolicy>>;
    async fn find_default_policy(
        &self,
        organization_id: &str,
        priority: Priority,
    ) -> ApiResult<Option<SlaPolicy>>;
    async fn delete_sla_policy(&self, policy_id: &str) -> ApiResult<bool>;
}
