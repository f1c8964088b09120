use crate::domain::entities::{Job, JobKind};
use crate::infrastructure::http::middleware::error::ApiResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Durable deferred-task substrate with at-least-once delivery
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(
        &self,
        kind: JobKind,
        organization_id: Option<&str>,
        payload: Value,
    ) -> ApiResult<String>;
    async fn enqueue_at(
        &self,
        kind: JobKind,
        organization_id: Option<&str>,
        payload: Value,
        run_at: DateTime<Utc>,
    ) -> ApiResult<String>;
    /// Lease the next due job, reclaiming jobs whose lease expired.
    async fn fetch_next_job(&self) -> ApiResult<Option<Job>>;
    async fn complete_job(&self, job_id: &str) -> ApiResult<()>;
    /// Record a failure; reschedules with backoff until attempts run out.
    async fn fail_job(&self, job_id: &str, error: &str) -> ApiResult<()>;
}
