use crate::application::services::*;
use crate::config::Config;
use crate::domain::entities::{PlanCatalog, SlaDefaults};
use crate::domain::ports::member_directory::MemberDirectory;
use crate::domain::ports::notification_sink::NotificationSink;
use crate::domain::ports::plan_repository::PlanRepository;
use crate::domain::ports::sla_repository::SlaRepository;
use crate::domain::ports::subscription_repository::SubscriptionRepository;
use crate::domain::ports::task_queue::TaskQueue;
use crate::domain::ports::task_spawner::TaskSpawner;
use crate::domain::ports::ticket_repository::TicketRepository;
use crate::domain::ports::time_service::TimeService;
use crate::domain::ports::usage_repository::UsageRepository;
use crate::infrastructure::http::middleware::{ApiResult, AppState};
use crate::infrastructure::persistence::Database;
use crate::infrastructure::runtime::{TokioTaskSpawner, TokioTimeService};
use crate::infrastructure::workers::{spawn_worker_pool, JobProcessor, QueueSettings, SqliteTaskQueue};
use std::sync::Arc;

/// Fully wired application services over one database
#[derive(Clone)]
pub struct Services {
    pub queue: Arc<SqliteTaskQueue>,
    pub notification_service: NotificationService,
    pub subscription_service: SubscriptionService,
    pub usage_service: UsageService,
    pub sla_service: SlaService,
    pub ticket_service: TicketService,
    pub time_service: Arc<dyn TimeService>,
}

impl Services {
    pub fn app_state(&self) -> AppState {
        AppState {
            ticket_service: self.ticket_service.clone(),
            sla_service: self.sla_service.clone(),
            usage_service: self.usage_service.clone(),
            subscription_service: self.subscription_service.clone(),
        }
    }

    pub fn job_processor(&self) -> JobProcessor {
        JobProcessor::new(
            self.queue.clone() as Arc<dyn TaskQueue>,
            self.sla_service.clone(),
            self.subscription_service.clone(),
            self.notification_service.clone(),
            self.time_service.clone(),
        )
    }
}

pub async fn build_services(
    db: Database,
    time_service: Arc<dyn TimeService>,
    queue_settings: QueueSettings,
    sla_defaults: SlaDefaults,
) -> ApiResult<Services> {
    let catalog = Arc::new(PlanCatalog::load(&db as &dyn PlanRepository).await?);
    if catalog.default_plan().is_none() {
        tracing::warn!("Plan catalog has no default plan; subscribe calls must name a plan");
    }

    let queue = Arc::new(SqliteTaskQueue::new(
        db.clone(),
        time_service.clone(),
        queue_settings,
    ));
    let task_queue = queue.clone() as Arc<dyn TaskQueue>;

    let notification_service = NotificationService::new(
        Arc::new(db.clone()) as Arc<dyn MemberDirectory>,
        task_queue.clone(),
        Arc::new(db.clone()) as Arc<dyn NotificationSink>,
    );

    let subscription_service = SubscriptionService::new(
        Arc::new(db.clone()) as Arc<dyn SubscriptionRepository>,
        Arc::new(db.clone()) as Arc<dyn UsageRepository>,
        task_queue.clone(),
        catalog,
        time_service.clone(),
    );

    let usage_service = UsageService::new(
        Arc::new(db.clone()) as Arc<dyn UsageRepository>,
        subscription_service.clone(),
        notification_service.clone(),
        time_service.clone(),
    );

    let sla_service = SlaService::new(
        Arc::new(db.clone()) as Arc<dyn SlaRepository>,
        Arc::new(db.clone()) as Arc<dyn TicketRepository>,
        task_queue.clone(),
        notification_service.clone(),
        time_service.clone(),
        sla_defaults,
    );

    let ticket_service = TicketService::new(
        Arc::new(db.clone()) as Arc<dyn TicketRepository>,
        Arc::new(db.clone()) as Arc<dyn MemberDirectory>,
        usage_service.clone(),
        sla_service.clone(),
        notification_service.clone(),
        time_service.clone(),
    );
    tracing::info!("Application services initialized");

    Ok(Services {
        queue,
        notification_service,
        subscription_service,
        usage_service,
        sla_service,
        ticket_service,
        time_service,
    })
}

/// Wire the services on the system clock and start the worker pool.
pub async fn build_app_state(
    db: Database,
    config: &Config,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let time_service = Arc::new(TokioTimeService::new()) as Arc<dyn TimeService>;
    let services = build_services(
        db,
        time_service,
        config.queue_settings(),
        config.sla_defaults,
    )
    .await?;

    let task_spawner = Arc::new(TokioTaskSpawner::new()) as Arc<dyn TaskSpawner>;
    spawn_worker_pool(
        config.worker_count,
        Arc::new(services.job_processor()),
        task_spawner.as_ref(),
    );

    Ok(services.app_state())
}
