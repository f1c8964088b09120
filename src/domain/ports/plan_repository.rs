use crate::domain::entities::Plan;
use crate::infrastructure::http::middleware::error::ApiResult;

/// Source of the plan table. Read once at startup into a `PlanCatalog`.
#[async_trait::async_trait]
pub trait PlanRepository: Send + Sync {
    async fn list_plans(&self) -> ApiResult<Vec<Plan>>;
}
