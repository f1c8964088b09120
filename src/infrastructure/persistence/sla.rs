use async_trait::async_trait;
use sqlx::{any::AnyRow, Row};

use crate::domain::entities::{Priority, SlaPolicy};
use crate::domain::ports::sla_repository::SlaRepository;
use crate::infrastructure::http::middleware::error::ApiResult;
use crate::infrastructure::persistence::Database;
use crate::shared::{parse_db_timestamp, to_db_timestamp};

const POLICY_COLUMNS: &str = "id, organization_id, name, priority, first_response_minutes, \
     resolution_minutes, is_default, created_at, updated_at";

fn row_to_policy(row: &AnyRow) -> ApiResult<SlaPolicy> {
    Ok(SlaPolicy {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        name: row.try_get("name")?,
        priority: row.try_get::<String, _>("priority")?.parse()?,
        first_response_minutes: row.try_get("first_response_minutes")?,
        resolution_minutes: row.try_get("resolution_minutes")?,
        is_default: row.try_get::<i64, _>("is_default")? != 0,
        created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_db_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[async_trait]
impl SlaRepository for Database {
    async fn create_sla_policy(&self, policy: &SlaPolicy) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO sla_policies (id, organization_id, name, priority, first_response_minutes,
                                       resolution_minutes, is_default, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&policy.id)
        .bind(&policy.organization_id)
        .bind(&policy.name)
        .bind(policy.priority.as_str())
        .bind(policy.first_response_minutes)
        .bind(policy.resolution_minutes)
        .bind(policy.is_default as i64)
        .bind(to_db_timestamp(policy.created_at))
        .bind(to_db_timestamp(policy.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_sla_policy(&self, policy_id: &str) -> ApiResult<Option<SlaPolicy>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sla_policies WHERE id = ?",
            POLICY_COLUMNS
        ))
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_policy).transpose()
    }

    async fn list_sla_policies(&self, organization_id: &str) -> ApiResult<Vec<SlaPolicy>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sla_policies WHERE organization_id = ? ORDER BY priority, created_at",
            POLICY_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_policy).collect()
    }

    async fn find_default_policy(
        &self,
        organization_id: &str,
        priority: Priority,
    ) -> ApiResult<Option<SlaPolicy>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sla_policies
             WHERE organization_id = ? AND priority = ? AND is_default = 1",
            POLICY_COLUMNS
        ))
        .bind(organization_id)
        .bind(priority.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_policy).transpose()
    }

    async fn delete_sla_policy(&self, policy_id: &str) -> ApiResult<bool> {
        let result = sqlx::query("DELETE FROM sla_policies WHERE id = ?")
            .bind(policy_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
