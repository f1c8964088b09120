use async_trait::async_trait;
use sqlx::{any::AnyRow, AnyConnection, Row};

use super::usage::{insert_usage, update_usage_if_unchanged};
use crate::domain::entities::{Subscription, UsageRecord};
use crate::domain::ports::subscription_repository::SubscriptionRepository;
use crate::infrastructure::http::middleware::error::{ApiError, ApiResult};
use crate::infrastructure::persistence::{nullable_text, Database};
use crate::shared::{parse_db_timestamp, parse_db_timestamp_opt, to_db_timestamp, to_db_timestamp_opt};

const SUBSCRIPTION_COLUMNS: &str = "id, organization_id, plan_id, previous_plan_id, status, \
     current_period_start, current_period_end, cancel_at_period_end, canceled_at, created_at, updated_at";

fn row_to_subscription(row: &AnyRow) -> ApiResult<Subscription> {
    Ok(Subscription {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        plan_id: row.try_get("plan_id")?,
        previous_plan_id: nullable_text(row, "previous_plan_id"),
        status: row.try_get::<String, _>("status")?.parse()?,
        current_period_start: parse_db_timestamp(&row.try_get::<String, _>("current_period_start")?)?,
        current_period_end: parse_db_timestamp(&row.try_get::<String, _>("current_period_end")?)?,
        cancel_at_period_end: row.try_get::<i64, _>("cancel_at_period_end")? != 0,
        canceled_at: parse_db_timestamp_opt(nullable_text(row, "canceled_at"))?,
        created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_db_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

async fn write_subscription(conn: &mut AnyConnection, subscription: &Subscription) -> ApiResult<()> {
    let result = sqlx::query(
        "UPDATE subscriptions
         SET plan_id = ?, previous_plan_id = ?, status = ?, current_period_start = ?,
             current_period_end = ?, cancel_at_period_end = ?, canceled_at = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&subscription.plan_id)
    .bind(&subscription.previous_plan_id)
    .bind(subscription.status.as_str())
    .bind(to_db_timestamp(subscription.current_period_start))
    .bind(to_db_timestamp(subscription.current_period_end))
    .bind(subscription.cancel_at_period_end as i64)
    .bind(to_db_timestamp_opt(subscription.canceled_at))
    .bind(to_db_timestamp(subscription.updated_at))
    .bind(&subscription.id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!(
            "Subscription {} not found",
            subscription.id
        )));
    }
    Ok(())
}

async fn retire_current_usage(
    conn: &mut AnyConnection,
    organization_id: &str,
    now: &str,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE usage_records SET is_current = 0, updated_at = ?
         WHERE organization_id = ? AND is_current = 1",
    )
    .bind(now)
    .bind(organization_id)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl SubscriptionRepository for Database {
    async fn create_subscription(
        &self,
        subscription: &Subscription,
        usage: &UsageRecord,
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO subscriptions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(&subscription.id)
        .bind(&subscription.organization_id)
        .bind(&subscription.plan_id)
        .bind(&subscription.previous_plan_id)
        .bind(subscription.status.as_str())
        .bind(to_db_timestamp(subscription.current_period_start))
        .bind(to_db_timestamp(subscription.current_period_end))
        .bind(subscription.cancel_at_period_end as i64)
        .bind(to_db_timestamp_opt(subscription.canceled_at))
        .bind(to_db_timestamp(subscription.created_at))
        .bind(to_db_timestamp(subscription.updated_at))
        .execute(&mut *tx)
        .await?;

        // A previous, canceled subscription may still own the current record
        retire_current_usage(&mut tx, &subscription.organization_id, &to_db_timestamp(usage.created_at))
            .await?;
        insert_usage(&mut tx, usage).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_live_subscription(&self, organization_id: &str) -> ApiResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions
             WHERE organization_id = ? AND status <> 'canceled'
             ORDER BY created_at DESC
             LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn get_latest_subscription(
        &self,
        organization_id: &str,
    ) -> ApiResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions
             WHERE organization_id = ?
             ORDER BY created_at DESC
             LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn update_subscription(&self, subscription: &Subscription) -> ApiResult<()> {
        let mut conn = self.pool.acquire().await?;
        write_subscription(&mut conn, subscription).await
    }

    async fn apply_plan_change(
        &self,
        subscription: &Subscription,
        usage: &UsageRecord,
    ) -> ApiResult<bool> {
        let mut tx = self.pool.begin().await?;

        if !update_usage_if_unchanged(&mut tx, usage).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        write_subscription(&mut tx, subscription).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn roll_period(&self, subscription: &Subscription, fresh: &UsageRecord) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        retire_current_usage(
            &mut tx,
            &subscription.organization_id,
            &to_db_timestamp(fresh.created_at),
        )
        .await?;
        insert_usage(&mut tx, fresh).await?;
        write_subscription(&mut tx, subscription).await?;

        tx.commit().await?;
        Ok(())
    }
}
