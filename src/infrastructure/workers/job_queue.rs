use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{any::AnyRow, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::entities::{Job, JobKind, JobStatus};
use crate::domain::ports::task_queue::TaskQueue;
use crate::domain::ports::time_service::TimeService;
use crate::shared::{parse_db_timestamp, parse_db_timestamp_opt, to_db_timestamp};
use crate::{
    infrastructure::http::middleware::error::ApiResult,
    infrastructure::persistence::{nullable_text, Database},
};

const JOB_COLUMNS: &str = "id, job_type, organization_id, payload, status, run_at, locked_until, \
     attempts, max_attempts, last_error, created_at, updated_at";

/// Retry and lease policy for the queue
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub max_attempts: i64,
    /// Fixed delay before a failed job becomes due again
    pub retry_backoff: Duration,
    /// How long a worker owns a leased job before others may reclaim it
    pub lock_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::seconds(30),
            lock_timeout: Duration::minutes(5),
        }
    }
}

fn row_to_job(row: &AnyRow) -> ApiResult<Job> {
    let payload: String = row.try_get("payload")?;
    Ok(Job {
        id: row.try_get("id")?,
        job_type: row.try_get("job_type")?,
        organization_id: nullable_text(row, "organization_id"),
        payload: serde_json::from_str(&payload)?,
        status: row.try_get::<String, _>("status")?.parse()?,
        run_at: parse_db_timestamp(&row.try_get::<String, _>("run_at")?)?,
        locked_until: parse_db_timestamp_opt(nullable_text(row, "locked_until"))?,
        created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_db_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        last_error: nullable_text(row, "last_error"),
    })
}

/// SQLite implementation of the TaskQueue
#[derive(Clone)]
pub struct SqliteTaskQueue {
    db: Database,
    clock: Arc<dyn TimeService>,
    settings: QueueSettings,
}

impl SqliteTaskQueue {
    pub fn new(db: Database, clock: Arc<dyn TimeService>, settings: QueueSettings) -> Self {
        Self {
            db,
            clock,
            settings,
        }
    }

    pub async fn get_job(&self, job_id: &str) -> ApiResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Jobs of one kind in the given state, oldest due first
    pub async fn list_jobs(&self, kind: JobKind, status: JobStatus) -> ApiResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE job_type = ? AND status = ? ORDER BY run_at ASC",
            JOB_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(row_to_job).collect()
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        organization_id: Option<&str>,
        payload: Value,
    ) -> ApiResult<String> {
        let now = self.clock.now();
        self.enqueue_at(kind, organization_id, payload, now).await
    }

    async fn enqueue_at(
        &self,
        kind: JobKind,
        organization_id: Option<&str>,
        payload: Value,
        run_at: DateTime<Utc>,
    ) -> ApiResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = to_db_timestamp(self.clock.now());

        sqlx::query(
            "INSERT INTO jobs (id, job_type, organization_id, payload, status, run_at, attempts,
                               max_attempts, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(organization_id)
        .bind(serde_json::to_string(&payload)?)
        .bind(JobStatus::Pending.as_str())
        .bind(to_db_timestamp(run_at))
        .bind(self.settings.max_attempts)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        tracing::debug!("Enqueued {} job {} for {}", kind, id, run_at);
        Ok(id)
    }

    async fn fetch_next_job(&self) -> ApiResult<Option<Job>> {
        let now = self.clock.now();
        let now_str = to_db_timestamp(now);
        let lease_until = to_db_timestamp(now + self.settings.lock_timeout);

        // Transaction to ensure atomic fetch-and-lock
        let mut tx = self.db.pool().begin().await?;

        // A lapsed lease on the last allowed attempt is not handed out again
        let exhausted = sqlx::query(
            "UPDATE jobs
             SET status = 'failed', attempts = attempts + 1, locked_until = NULL,
                 last_error = ?, updated_at = ?
             WHERE status = 'processing' AND locked_until < ? AND attempts + 1 >= max_attempts",
        )
        .bind("Lease expired before the job finished")
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if exhausted > 0 {
            metrics::counter!("jobs_failed_total").increment(exhausted);
            tracing::error!(
                "{} job(s) failed permanently after their final lease expired",
                exhausted
            );
        }

        // Due pending jobs, or jobs whose worker died holding the lease
        let candidate_row = sqlx::query(
            "SELECT id FROM jobs
             WHERE (status = 'pending' AND run_at <= ?)
                OR (status = 'processing' AND locked_until < ?)
             ORDER BY run_at ASC
             LIMIT 1",
        )
        .bind(&now_str)
        .bind(&now_str)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate_row else {
            tx.commit().await?;
            return Ok(None);
        };
        let id: String = row.try_get("id")?;

        // Only one worker may win the transition; a reclaimed lease counts as an attempt
        let result = sqlx::query(
            "UPDATE jobs
             SET attempts = CASE WHEN status = 'processing' THEN attempts + 1 ELSE attempts END,
                 status = 'processing', locked_until = ?, updated_at = ?
             WHERE id = ?
               AND ((status = 'pending' AND run_at <= ?)
                 OR (status = 'processing' AND locked_until < ?))",
        )
        .bind(&lease_until)
        .bind(&now_str)
        .bind(&id)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // We lost the race, another worker took this job.
            tx.commit().await?;
            return Ok(None);
        }

        let job_row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        row_to_job(&job_row).map(Some)
    }

    async fn complete_job(&self, job_id: &str) -> ApiResult<()> {
        sqlx::query(
            "UPDATE jobs
             SET status = 'completed', locked_until = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(to_db_timestamp(self.clock.now()))
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn fail_job(&self, job_id: &str, error: &str) -> ApiResult<()> {
        let now = self.clock.now();

        let row = sqlx::query("SELECT attempts, max_attempts FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(self.db.pool())
            .await?;

        let attempts: i64 = row.try_get("attempts")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;
        let new_attempts = attempts + 1;

        if new_attempts < max_attempts {
            let next_run = now + self.settings.retry_backoff;

            sqlx::query(
                "UPDATE jobs
                 SET status = 'pending', attempts = ?, last_error = ?, run_at = ?,
                     locked_until = NULL, updated_at = ?
                 WHERE id = ?",
            )
            .bind(new_attempts)
            .bind(error)
            .bind(to_db_timestamp(next_run))
            .bind(to_db_timestamp(now))
            .bind(job_id)
            .execute(self.db.pool())
            .await?;
        } else {
            // Permanent failure
            sqlx::query(
                "UPDATE jobs
                 SET status = 'failed', attempts = ?, last_error = ?, locked_until = NULL, updated_at = ?
                 WHERE id = ?",
            )
            .bind(new_attempts)
            .bind(error)
            .bind(to_db_timestamp(now))
            .bind(job_id)
            .execute(self.db.pool())
            .await?;

            metrics::counter!("jobs_failed_total").increment(1);
            tracing::error!(
                "Job {} failed permanently after {} attempts: {}",
                job_id,
                new_attempts,
                error
            );
        }

        Ok(())
    }
}
