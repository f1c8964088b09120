use std::sync::Arc;

use ticketcore::bootstrap::{build_services, Services};
use ticketcore::domain::entities::*;
use ticketcore::domain::ports::member_directory::MemberDirectory;
use ticketcore::domain::ports::time_service::TimeService;
use ticketcore::infrastructure::persistence::Database;
use ticketcore::infrastructure::workers::QueueSettings;

use super::clock::{start_time, ManualTimeService};
use super::test_db::{setup_test_db, TestDatabase};

pub const ORG: &str = "org-acme";
pub const OTHER_ORG: &str = "org-globex";

pub struct TestApp {
    pub test_db: TestDatabase,
    pub clock: ManualTimeService,
    pub services: Services,
}

/// Actors of one seeded organization
pub struct Team {
    pub admin: Actor,
    pub agent: Actor,
    pub customer: Actor,
    pub other_customer: Actor,
}

impl TestApp {
    pub fn db(&self) -> Database {
        self.test_db.db()
    }

    /// Run every job that is due at the current clock reading.
    pub async fn run_due_jobs(&self) -> usize {
        let processor = self.services.job_processor();
        let mut handled = 0;
        while let Some(_) = processor.process_next().await.expect("job fetch failed") {
            handled += 1;
            assert!(handled < 500, "job queue did not drain");
        }
        handled
    }

    pub async fn notifications_for(&self, user_id: &str) -> Vec<Notification> {
        self.db().list_notifications(user_id, 100).await.unwrap()
    }
}

pub async fn setup_app() -> TestApp {
    setup_app_with(QueueSettings::default()).await
}

pub async fn setup_app_with(settings: QueueSettings) -> TestApp {
    let test_db = setup_test_db().await;
    let clock = ManualTimeService::new(start_time());
    let services = build_services(
        test_db.db(),
        Arc::new(clock.clone()) as Arc<dyn TimeService>,
        settings,
        SlaDefaults::default(),
    )
    .await
    .expect("Failed to build services");

    TestApp {
        test_db,
        clock,
        services,
    }
}

pub async fn add_member(db: &Database, organization_id: &str, user_id: &str, role: Role) -> Actor {
    db.sync_member(&Member {
        organization_id: organization_id.to_string(),
        user_id: user_id.to_string(),
        role,
        created_at: start_time(),
    })
    .await
    .expect("Failed to sync member");
    Actor::new(user_id, organization_id, role)
}

/// Members for `organization_id`, subscribed to `plan_id`.
pub async fn seed_org(app: &TestApp, organization_id: &str, plan_id: &str) -> Team {
    let db = app.db();
    let team = Team {
        admin: add_member(&db, organization_id, &format!("{}-admin", organization_id), Role::Admin).await,
        agent: add_member(&db, organization_id, &format!("{}-agent", organization_id), Role::Agent).await,
        customer: add_member(&db, organization_id, &format!("{}-customer", organization_id), Role::Customer).await,
        other_customer: add_member(
            &db,
            organization_id,
            &format!("{}-customer-2", organization_id),
            Role::Customer,
        )
        .await,
    };
    app.services
        .subscription_service
        .subscribe(organization_id, Some(plan_id))
        .await
        .expect("Failed to subscribe organization");
    team
}

pub fn ticket_request(title: &str, priority: Priority) -> CreateTicket {
    CreateTicket {
        title: title.to_string(),
        description: format!("{} (details)", title),
        priority: Some(priority),
        ..Default::default()
    }
}

pub async fn create_ticket(app: &TestApp, actor: &Actor, title: &str, priority: Priority) -> Ticket {
    app.services
        .ticket_service
        .create_ticket(actor, ticket_request(title, priority))
        .await
        .expect("Failed to create ticket")
}

pub async fn timeline_actions(app: &TestApp, actor: &Actor, ticket_id: &str) -> Vec<ActivityAction> {
    app.services
        .ticket_service
        .get_timeline(actor, ticket_id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.action)
        .collect()
}
