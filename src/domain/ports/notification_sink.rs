use crate::domain::entities::OutboundNotification;
use crate::infrastructure::http::middleware::error::ApiResult;

/// Outbound delivery transport
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification. Returns false when a notification with the
    /// same dedupe key was already delivered.
    async fn deliver(&self, notification: &OutboundNotification) -> ApiResult<bool>;
}
