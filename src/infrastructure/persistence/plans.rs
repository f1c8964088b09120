use async_trait::async_trait;
use sqlx::Row;

use crate::domain::entities::{Plan, PlanLimits};
use crate::domain::ports::plan_repository::PlanRepository;
use crate::infrastructure::http::middleware::error::ApiResult;
use crate::infrastructure::persistence::Database;

#[async_trait]
impl PlanRepository for Database {
    async fn list_plans(&self) -> ApiResult<Vec<Plan>> {
        let rows = sqlx::query(
            "SELECT id, name, price_cents, tickets_per_month, messages_per_month, storage_per_org_mb,
                    api_requests_per_minute, agents_per_org, customers_per_org, features,
                    alerts_enabled, alert_threshold_percent, is_active, is_default
             FROM plans
             ORDER BY price_cents ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> ApiResult<Plan> {
                let features: String = row.try_get("features")?;
                Ok(Plan {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    price_cents: row.try_get("price_cents")?,
                    limits: PlanLimits {
                        tickets_per_month: row.try_get("tickets_per_month")?,
                        messages_per_month: row.try_get("messages_per_month")?,
                        storage_per_org_mb: row.try_get("storage_per_org_mb")?,
                        api_requests_per_minute: row.try_get("api_requests_per_minute")?,
                        agents_per_org: row.try_get("agents_per_org")?,
                        customers_per_org: row.try_get("customers_per_org")?,
                    },
                    features: serde_json::from_str(&features)?,
                    alerts_enabled: row.try_get::<i64, _>("alerts_enabled")? != 0,
                    alert_threshold_percent: row.try_get("alert_threshold_percent")?,
                    is_active: row.try_get::<i64, _>("is_active")? != 0,
                    is_default: row.try_get::<i64, _>("is_default")? != 0,
                })
            })
            .collect()
    }
}
