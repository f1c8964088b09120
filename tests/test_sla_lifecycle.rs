mod helpers;

use chrono::Duration;
use helpers::*;
use ticketcore::domain::entities::*;
use ticketcore::domain::ports::ticket_repository::TicketRepository;
use ticketcore::infrastructure::http::middleware::ApiError;

async fn breach_notifications(app: &TestApp, user_id: &str) -> Vec<Notification> {
    app.notifications_for(user_id)
        .await
        .into_iter()
        .filter(|n| n.kind == NotificationKind::SlaBreached)
        .collect()
}

async fn breach_count(app: &TestApp, actor: &Actor, ticket_id: &str) -> usize {
    timeline_actions(app, actor, ticket_id)
        .await
        .into_iter()
        .filter(|a| *a == ActivityAction::SlaBreached)
        .count()
}

#[tokio::test]
async fn test_unanswered_ticket_breaches_once() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let ticket = create_ticket(&app, &team.customer, "Checkout broken", Priority::High).await;
    let deadline = start_time() + Duration::hours(4);
    assert_eq!(ticket.sla_deadline, Some(deadline));
    service
        .assign_ticket(&team.admin, &ticket.id, Some(team.agent.user_id.clone()))
        .await
        .unwrap();

    app.clock.advance(Duration::hours(3));
    app.run_due_jobs().await;
    let early = service.get_ticket(&team.agent, &ticket.id).await.unwrap();
    assert!(!early.sla_breached);

    app.clock.advance(Duration::hours(1) + Duration::minutes(1));
    app.run_due_jobs().await;

    let breached = service.get_ticket(&team.agent, &ticket.id).await.unwrap();
    assert!(breached.sla_breached);
    assert_eq!(breached.status, TicketStatus::Pending);
    assert_eq!(breach_count(&app, &team.agent, &ticket.id).await, 1);

    assert_eq!(breach_notifications(&app, &team.admin.user_id).await.len(), 1);
    assert_eq!(breach_notifications(&app, &team.agent.user_id).await.len(), 1);
    assert!(breach_notifications(&app, &team.customer.user_id).await.is_empty());

    // A redelivered check leaves a single activity and no extra notifications
    let duplicate = SlaCheckPayload {
        ticket_id: ticket.id.clone(),
        organization_id: ORG.to_string(),
        deadline,
    };
    let outcome = app.services.sla_service.check_breach(&duplicate).await.unwrap();
    assert_eq!(outcome, BreachOutcome::NotApplicable);
    app.run_due_jobs().await;

    assert_eq!(breach_count(&app, &team.agent, &ticket.id).await, 1);
    assert_eq!(breach_notifications(&app, &team.admin.user_id).await.len(), 1);
    assert_eq!(breach_notifications(&app, &team.agent.user_id).await.len(), 1);
}

#[tokio::test]
async fn test_check_at_exact_deadline_looks_again() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let ticket = create_ticket(&app, &team.customer, "Urgent outage", Priority::Urgent).await;
    let deadline = ticket.sla_deadline.unwrap();
    assert_eq!(deadline, start_time() + Duration::hours(1));

    app.clock.set(deadline);
    app.run_due_jobs().await;
    assert!(!service.get_ticket(&team.agent, &ticket.id).await.unwrap().sla_breached);

    app.clock.advance(Duration::seconds(1));
    app.run_due_jobs().await;
    assert!(service.get_ticket(&team.agent, &ticket.id).await.unwrap().sla_breached);
}

#[tokio::test]
async fn test_closed_ticket_never_breaches() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let ticket = create_ticket(&app, &team.customer, "Login loop", Priority::High).await;
    app.clock.advance(Duration::hours(2));
    service.close_ticket(&team.agent, &ticket.id).await.unwrap();

    app.clock.advance(Duration::hours(3));
    app.run_due_jobs().await;

    let closed = service.get_ticket(&team.agent, &ticket.id).await.unwrap();
    assert!(!closed.sla_breached);
    assert_eq!(breach_count(&app, &team.agent, &ticket.id).await, 0);
    assert!(breach_notifications(&app, &team.admin.user_id).await.is_empty());
}

#[tokio::test]
async fn test_first_response_prevents_breach() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let ticket = create_ticket(&app, &team.customer, "Slow dashboard", Priority::High).await;
    app.clock.advance(Duration::hours(1));
    service
        .add_message(
            &team.agent,
            &ticket.id,
            AddMessage {
                body: "Looking into it".into(),
                is_internal: false,
            },
        )
        .await
        .unwrap();

    app.clock.advance(Duration::hours(5));
    app.run_due_jobs().await;

    let answered = service.get_ticket(&team.agent, &ticket.id).await.unwrap();
    assert!(!answered.sla_breached);
    assert_eq!(answered.status, TicketStatus::Open);
}

#[tokio::test]
async fn test_reopen_clears_breach_and_rearms() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let ticket = create_ticket(&app, &team.customer, "Export fails", Priority::High).await;
    app.clock.advance(Duration::hours(5));
    app.run_due_jobs().await;
    assert!(service.get_ticket(&team.agent, &ticket.id).await.unwrap().sla_breached);

    service.close_ticket(&team.agent, &ticket.id).await.unwrap();
    let reopened_at = app.clock.advance(Duration::minutes(30));
    let reopened = service.reopen_ticket(&team.customer, &ticket.id).await.unwrap();
    assert!(!reopened.sla_breached);
    assert_eq!(reopened.sla_deadline, Some(reopened_at + Duration::hours(4)));

    // The old deadline's check is long gone; nothing fires before the new one
    app.clock.advance(Duration::hours(3));
    app.run_due_jobs().await;
    assert!(!service.get_ticket(&team.agent, &ticket.id).await.unwrap().sla_breached);

    app.clock.advance(Duration::hours(1) + Duration::minutes(1));
    app.run_due_jobs().await;
    assert!(service.get_ticket(&team.agent, &ticket.id).await.unwrap().sla_breached);

    assert_eq!(breach_count(&app, &team.agent, &ticket.id).await, 2);
    // Each deadline notifies once
    assert_eq!(breach_notifications(&app, &team.admin.user_id).await.len(), 2);
}

#[tokio::test]
async fn test_deleted_ticket_check_is_dropped() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;

    let ticket = create_ticket(&app, &team.customer, "Duplicate", Priority::Low).await;
    app.services
        .ticket_service
        .bulk_delete(
            &team.admin,
            BulkDelete {
                ticket_ids: vec![ticket.id.clone()],
                permanent: true,
            },
        )
        .await
        .unwrap();

    let payload = SlaCheckPayload {
        ticket_id: ticket.id.clone(),
        organization_id: ORG.to_string(),
        deadline: ticket.sla_deadline.unwrap(),
    };
    app.clock.advance(Duration::days(2));
    let outcome = app.services.sla_service.check_breach(&payload).await.unwrap();
    assert_eq!(outcome, BreachOutcome::TicketGone);

    // The armed job completes quietly
    assert!(app.run_due_jobs().await >= 1);
    assert!(app
        .services
        .queue
        .list_jobs(JobKind::SlaCheck, JobStatus::Failed)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_policy_overrides_default_deadline() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let other = seed_org(&app, OTHER_ORG, "starter").await;
    let sla = &app.services.sla_service;

    let request = CreateSlaPolicy {
        name: "Gold high".into(),
        priority: Priority::High,
        first_response_minutes: 30,
        resolution_minutes: 240,
        is_default: true,
    };

    let err = sla.create_policy(&team.agent, request.clone()).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let policy = sla.create_policy(&team.admin, request.clone()).await.unwrap();
    let err = sla.create_policy(&team.admin, request.clone()).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let invalid = CreateSlaPolicy {
        first_response_minutes: 0,
        ..request.clone()
    };
    let err = sla.create_policy(&team.admin, invalid).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    assert_eq!(sla.list_policies(&team.agent).await.unwrap().len(), 1);
    assert!(sla.list_policies(&other.admin).await.unwrap().is_empty());
    let err = sla.list_policies(&team.customer).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let fast = create_ticket(&app, &team.customer, "Gold customer", Priority::High).await;
    assert_eq!(fast.sla_deadline, Some(start_time() + Duration::minutes(30)));
    // Other tiers and other organizations keep the defaults
    let medium = create_ticket(&app, &team.customer, "Question", Priority::Medium).await;
    assert_eq!(medium.sla_deadline, Some(start_time() + Duration::hours(8)));
    let elsewhere = create_ticket(&app, &other.customer, "Elsewhere", Priority::High).await;
    assert_eq!(elsewhere.sla_deadline, Some(start_time() + Duration::hours(4)));

    let err = sla.delete_policy(&other.admin, &policy.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    sla.delete_policy(&team.admin, &policy.id).await.unwrap();
    let err = sla.delete_policy(&team.admin, &policy.id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let slow = create_ticket(&app, &team.customer, "After removal", Priority::High).await;
    assert_eq!(slow.sla_deadline, Some(start_time() + Duration::hours(4)));
}

#[tokio::test]
async fn test_exact_deadline_recheck_with_fractional_clock() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    app.clock.set(start_time() + Duration::nanoseconds(987_654_321));
    let ticket = create_ticket(&app, &team.customer, "Invoices missing", Priority::Urgent).await;
    let stored = service
        .get_ticket(&team.agent, &ticket.id)
        .await
        .unwrap()
        .sla_deadline
        .unwrap();
    assert_eq!(stored.timestamp_subsec_nanos(), 987_654_000);

    app.clock.set(stored);
    app.run_due_jobs().await;
    assert!(!service.get_ticket(&team.agent, &ticket.id).await.unwrap().sla_breached);

    app.clock.advance(Duration::seconds(1));
    app.run_due_jobs().await;
    assert!(service.get_ticket(&team.agent, &ticket.id).await.unwrap().sla_breached);
    assert_eq!(breach_count(&app, &team.agent, &ticket.id).await, 1);
}

#[tokio::test]
async fn test_stored_ticket_reads_back_unset_fields() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let db = app.db();

    let ticket = create_ticket(&app, &team.customer, "Typo on homepage", Priority::Low).await;
    let stored = db.get_ticket(&ticket.id).await.unwrap().unwrap();
    assert!(stored.category.is_none());
    assert!(stored.assignee_id.is_none());
    assert!(stored.first_response_at.is_none());
    assert!(stored.resolved_at.is_none());
    assert!(stored.closed_at.is_none());
    assert!(stored.merged_into_id.is_none());
    assert_eq!(stored.sla_deadline, Some(start_time() + Duration::hours(24)));

    app.services
        .ticket_service
        .add_message(
            &team.customer,
            &ticket.id,
            AddMessage {
                body: "Still there".into(),
                is_internal: false,
            },
        )
        .await
        .unwrap();
    let messages = db.list_messages(&ticket.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].copied_from_id.is_none());

    // The breach is recorded by the system, without an acting user
    app.clock.advance(Duration::hours(25));
    app.run_due_jobs().await;
    let activities = db.list_activities(&ticket.id).await.unwrap();
    let breach = activities
        .iter()
        .find(|a| a.action == ActivityAction::SlaBreached)
        .unwrap();
    assert!(breach.actor_id.is_none());
    assert_eq!(activities[0].actor_id.as_deref(), Some(team.customer.user_id.as_str()));
}
