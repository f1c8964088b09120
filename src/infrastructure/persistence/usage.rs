use async_trait::async_trait;
use sqlx::{any::AnyRow, AnyConnection, Row};

use crate::domain::entities::UsageRecord;
use crate::domain::ports::usage_repository::UsageRepository;
use crate::infrastructure::http::middleware::error::ApiResult;
use crate::infrastructure::persistence::{nullable_text, Database};
use crate::shared::{parse_db_timestamp, parse_db_timestamp_opt, to_db_timestamp, to_db_timestamp_opt};

const USAGE_COLUMNS: &str = "id, organization_id, subscription_id, period_start, period_end, is_current, \
     tickets_used, messages_used, storage_used_mb, api_calls_used, api_window_started_at, api_window_count, \
     tickets_remaining, messages_remaining, storage_remaining_mb, api_calls_remaining, \
     tickets_alert_sent_at, messages_alert_sent_at, storage_alert_sent_at, api_calls_alert_sent_at, \
     version, created_at, updated_at";

fn row_to_usage(row: &AnyRow) -> ApiResult<UsageRecord> {
    Ok(UsageRecord {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        subscription_id: row.try_get("subscription_id")?,
        period_start: parse_db_timestamp(&row.try_get::<String, _>("period_start")?)?,
        period_end: parse_db_timestamp(&row.try_get::<String, _>("period_end")?)?,
        is_current: row.try_get::<i64, _>("is_current")? != 0,
        tickets_used: row.try_get("tickets_used")?,
        messages_used: row.try_get("messages_used")?,
        storage_used_mb: row.try_get("storage_used_mb")?,
        api_calls_used: row.try_get("api_calls_used")?,
        api_window_started_at: parse_db_timestamp_opt(nullable_text(row, "api_window_started_at"))?,
        api_window_count: row.try_get("api_window_count")?,
        tickets_remaining: row.try_get("tickets_remaining")?,
        messages_remaining: row.try_get("messages_remaining")?,
        storage_remaining_mb: row.try_get("storage_remaining_mb")?,
        api_calls_remaining: row.try_get("api_calls_remaining")?,
        tickets_alert_sent_at: parse_db_timestamp_opt(nullable_text(row, "tickets_alert_sent_at"))?,
        messages_alert_sent_at: parse_db_timestamp_opt(nullable_text(row, "messages_alert_sent_at"))?,
        storage_alert_sent_at: parse_db_timestamp_opt(nullable_text(row, "storage_alert_sent_at"))?,
        api_calls_alert_sent_at: parse_db_timestamp_opt(nullable_text(row, "api_calls_alert_sent_at"))?,
        version: row.try_get("version")?,
        created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_db_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

pub(super) async fn insert_usage(conn: &mut AnyConnection, record: &UsageRecord) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO usage_records ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        USAGE_COLUMNS
    ))
    .bind(&record.id)
    .bind(&record.organization_id)
    .bind(&record.subscription_id)
    .bind(to_db_timestamp(record.period_start))
    .bind(to_db_timestamp(record.period_end))
    .bind(record.is_current as i64)
    .bind(record.tickets_used)
    .bind(record.messages_used)
    .bind(record.storage_used_mb)
    .bind(record.api_calls_used)
    .bind(to_db_timestamp_opt(record.api_window_started_at))
    .bind(record.api_window_count)
    .bind(record.tickets_remaining)
    .bind(record.messages_remaining)
    .bind(record.storage_remaining_mb)
    .bind(record.api_calls_remaining)
    .bind(to_db_timestamp_opt(record.tickets_alert_sent_at))
    .bind(to_db_timestamp_opt(record.messages_alert_sent_at))
    .bind(to_db_timestamp_opt(record.storage_alert_sent_at))
    .bind(to_db_timestamp_opt(record.api_calls_alert_sent_at))
    .bind(record.version)
    .bind(to_db_timestamp(record.created_at))
    .bind(to_db_timestamp(record.updated_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Version-checked write of the mutable counters. False when the stored
/// version no longer matches `record.version`.
pub(super) async fn update_usage_if_unchanged(
    conn: &mut AnyConnection,
    record: &UsageRecord,
) -> ApiResult<bool> {
    let result = sqlx::query(
        "UPDATE usage_records
         SET tickets_used = ?, messages_used = ?, storage_used_mb = ?, api_calls_used = ?,
             api_window_started_at = ?, api_window_count = ?,
             tickets_remaining = ?, messages_remaining = ?, storage_remaining_mb = ?, api_calls_remaining = ?,
             tickets_alert_sent_at = ?, messages_alert_sent_at = ?, storage_alert_sent_at = ?,
             api_calls_alert_sent_at = ?, subscription_id = ?, updated_at = ?, version = version + 1
         WHERE id = ? AND version = ?",
    )
    .bind(record.tickets_used)
    .bind(record.messages_used)
    .bind(record.storage_used_mb)
    .bind(record.api_calls_used)
    .bind(to_db_timestamp_opt(record.api_window_started_at))
    .bind(record.api_window_count)
    .bind(record.tickets_remaining)
    .bind(record.messages_remaining)
    .bind(record.storage_remaining_mb)
    .bind(record.api_calls_remaining)
    .bind(to_db_timestamp_opt(record.tickets_alert_sent_at))
    .bind(to_db_timestamp_opt(record.messages_alert_sent_at))
    .bind(to_db_timestamp_opt(record.storage_alert_sent_at))
    .bind(to_db_timestamp_opt(record.api_calls_alert_sent_at))
    .bind(&record.subscription_id)
    .bind(to_db_timestamp(record.updated_at))
    .bind(&record.id)
    .bind(record.version)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl UsageRepository for Database {
    async fn get_current_usage(&self, organization_id: &str) -> ApiResult<Option<UsageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM usage_records WHERE organization_id = ? AND is_current = 1",
            USAGE_COLUMNS
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_usage).transpose()
    }

    async fn insert_current_usage(&self, record: &UsageRecord) -> ApiResult<bool> {
        let mut conn = self.pool.acquire().await?;
        match insert_usage(&mut conn, record).await {
            Ok(()) => Ok(true),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                tracing::debug!(
                    "Current usage record for organization {} already exists",
                    record.organization_id
                );
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save_usage(&self, record: &UsageRecord) -> ApiResult<bool> {
        let mut conn = self.pool.acquire().await?;
        update_usage_if_unchanged(&mut conn, record).await
    }

    async fn list_usage_history(&self, organization_id: &str) -> ApiResult<Vec<UsageRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM usage_records
             WHERE organization_id = ?
             ORDER BY period_start DESC, created_at DESC",
            USAGE_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_usage).collect()
    }
}
