use async_trait::async_trait;
use sqlx::Row;

use crate::domain::entities::{Notification, OutboundNotification};
use crate::domain::ports::notification_sink::NotificationSink;
use crate::infrastructure::http::middleware::error::ApiResult;
use crate::infrastructure::persistence::Database;
use crate::shared::{parse_db_timestamp, to_db_timestamp};

impl Database {
    /// In-app inbox for one user, newest first
    pub async fn list_notifications(
        &self,
        recipient_user_id: &str,
        limit: i64,
    ) -> ApiResult<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, recipient_user_id, organization_id, kind, title, message, context,
                    dedupe_key, is_read, created_at
             FROM notifications
             WHERE recipient_user_id = ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(recipient_user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> ApiResult<Notification> {
                let context: String = row.try_get("context")?;
                Ok(Notification {
                    id: row.try_get("id")?,
                    recipient_user_id: row.try_get("recipient_user_id")?,
                    organization_id: row.try_get("organization_id")?,
                    kind: row.try_get::<String, _>("kind")?.parse()?,
                    title: row.try_get("title")?,
                    message: row.try_get("message")?,
                    context: serde_json::from_str(&context)?,
                    dedupe_key: row.try_get("dedupe_key")?,
                    is_read: row.try_get::<i64, _>("is_read")? != 0,
                    created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl NotificationSink for Database {
    async fn deliver(&self, notification: &OutboundNotification) -> ApiResult<bool> {
        let stored = Notification::from_outbound(notification.clone(), chrono::Utc::now());

        let result = sqlx::query(
            "INSERT OR IGNORE INTO notifications (id, recipient_user_id, organization_id, kind, title,
                                                  message, context, dedupe_key, is_read, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&stored.id)
        .bind(&stored.recipient_user_id)
        .bind(&stored.organization_id)
        .bind(stored.kind.as_str())
        .bind(&stored.title)
        .bind(&stored.message)
        .bind(serde_json::to_string(&stored.context)?)
        .bind(&stored.dedupe_key)
        .bind(to_db_timestamp(stored.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
