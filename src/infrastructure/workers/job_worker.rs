use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::application::services::{NotificationService, SlaService, SubscriptionService};
use crate::domain::entities::{
    Job, JobKind, OutboundNotification, PeriodRolloverPayload, SlaCheckPayload,
};
use crate::domain::ports::task_queue::TaskQueue;
use crate::domain::ports::task_spawner::TaskSpawner;
use crate::domain::ports::time_service::TimeService;

/// Pulls due jobs off the queue and runs them. Every handler reloads state and
/// decides afresh, so a job redelivered after a crash is harmless.
pub struct JobProcessor {
    queue: Arc<dyn TaskQueue>,
    sla_service: SlaService,
    subscription_service: SubscriptionService,
    notification_service: NotificationService,
    time_service: Arc<dyn TimeService>,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        sla_service: SlaService,
        subscription_service: SubscriptionService,
        notification_service: NotificationService,
        time_service: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            queue,
            sla_service,
            subscription_service,
            notification_service,
            time_service,
        }
    }

    pub async fn run(&self) {
        info!("Starting JobProcessor...");
        loop {
            match self.process_next().await {
                Ok(Some(_)) => {
                    // Job processed, check for next one immediately
                    continue;
                }
                Ok(None) => {
                    self.time_service.sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!("Error processing job: {}", e);
                    self.time_service.sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// Run at most one due job. Returns the id of the job that was handled.
    pub async fn process_next(&self) -> Result<Option<String>, String> {
        let job = self
            .queue
            .fetch_next_job()
            .await
            .map_err(|e| e.to_string())?;

        let Some(job) = job else {
            return Ok(None);
        };
        debug!(
            "Processing job {} (type: {}, attempt {})",
            job.id,
            job.job_type,
            job.attempts + 1
        );

        match self.execute_job(&job).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete_job(&job.id).await {
                    error!("Failed to mark job {} as completed: {}", job.id, e);
                }
            }
            Err(e) => {
                error!("Job {} ({}) failed: {}", job.id, job.job_type, e);
                if let Err(retry_err) = self.queue.fail_job(&job.id, &e).await {
                    error!("Failed to mark job {} as failed: {}", job.id, retry_err);
                }
            }
        }

        Ok(Some(job.id))
    }

    async fn execute_job(&self, job: &Job) -> Result<(), String> {
        let kind: JobKind = job.job_type.parse().map_err(|e| format!("{}", e))?;
        match kind {
            JobKind::SlaCheck => self.handle_sla_check(&job.payload).await,
            JobKind::UsagePeriodRollover => self.handle_period_rollover(&job.payload).await,
            JobKind::DeliverNotification => self.handle_deliver_notification(&job.payload).await,
        }
    }

    // --- Job Handlers ---

    async fn handle_sla_check(&self, payload: &Value) -> Result<(), String> {
        let payload: SlaCheckPayload = parse_payload(payload)?;
        let outcome = self
            .sla_service
            .check_breach(&payload)
            .await
            .map_err(|e| format!("SLA check for ticket {} failed: {}", payload.ticket_id, e))?;
        debug!("SLA check for ticket {}: {:?}", payload.ticket_id, outcome);
        Ok(())
    }

    async fn handle_period_rollover(&self, payload: &Value) -> Result<(), String> {
        let payload: PeriodRolloverPayload = parse_payload(payload)?;
        let outcome = self
            .subscription_service
            .handle_period_rollover(&payload)
            .await
            .map_err(|e| {
                format!(
                    "Period rollover for organization {} failed: {}",
                    payload.organization_id, e
                )
            })?;
        debug!(
            "Period rollover for organization {}: {:?}",
            payload.organization_id, outcome
        );
        Ok(())
    }

    async fn handle_deliver_notification(&self, payload: &Value) -> Result<(), String> {
        let notification: OutboundNotification = parse_payload(payload)?;
        self.notification_service
            .deliver(&notification)
            .await
            .map_err(|e| format!("Notification delivery failed: {}", e))?;
        Ok(())
    }
}

fn parse_payload<T: DeserializeOwned>(payload: &Value) -> Result<T, String> {
    serde_json::from_value(payload.clone()).map_err(|e| format!("Malformed job payload: {}", e))
}

/// Start `count` workers sharing one processor.
pub fn spawn_worker_pool(count: usize, processor: Arc<JobProcessor>, spawner: &dyn TaskSpawner) {
    for worker in 0..count {
        let processor = processor.clone();
        spawner.spawn(Box::pin(async move {
            debug!("Worker {} online", worker);
            processor.run().await;
        }));
    }
    info!("Spawned {} job worker(s)", count);
}
