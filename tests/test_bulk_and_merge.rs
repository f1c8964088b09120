mod helpers;

use helpers::*;
use ticketcore::domain::entities::*;
use ticketcore::infrastructure::http::middleware::ApiError;

#[tokio::test]
async fn test_bulk_update_accumulates_partial_failures() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let other = seed_org(&app, OTHER_ORG, "starter").await;
    let service = &app.services.ticket_service;

    let a = create_ticket(&app, &team.customer, "A", Priority::Low).await;
    let b = create_ticket(&app, &team.customer, "B", Priority::Low).await;
    let closed = create_ticket(&app, &team.customer, "Closed", Priority::Low).await;
    service.close_ticket(&team.agent, &closed.id).await.unwrap();
    let foreign = create_ticket(&app, &other.customer, "Foreign", Priority::Low).await;

    let result = service
        .bulk_update(
            &team.agent,
            BulkUpdate {
                ticket_ids: vec![
                    a.id.clone(),
                    b.id.clone(),
                    closed.id.clone(),
                    foreign.id.clone(),
                    "missing".into(),
                ],
                status: Some(TicketStatus::Resolved),
                priority: Some(Priority::High),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 3);
    assert!(result.errors.contains_key(&closed.id));
    assert!(result.errors.contains_key(&foreign.id));
    assert!(result.errors["missing"].contains("not found"));

    for id in [&a.id, &b.id] {
        let ticket = service.get_ticket(&team.agent, id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Resolved);
        assert_eq!(ticket.priority, Priority::High);
    }
    // The foreign ticket is untouched
    let untouched = service.get_ticket(&other.agent, &foreign.id).await.unwrap();
    assert_eq!(untouched.status, TicketStatus::Open);
}

#[tokio::test]
async fn test_bulk_request_size_limits() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let err = service
        .bulk_update(
            &team.agent,
            BulkUpdate {
                ticket_ids: vec![],
                status: Some(TicketStatus::Closed),
                priority: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let too_many: Vec<String> = (0..=MAX_BULK_IDS).map(|i| format!("t-{}", i)).collect();
    let err = service
        .bulk_assign(
            &team.agent,
            BulkAssign {
                ticket_ids: too_many,
                assignee_id: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    // Customers may not run batch operations at all
    let err = service
        .bulk_update(
            &team.customer,
            BulkUpdate {
                ticket_ids: vec!["x".into()],
                status: Some(TicketStatus::Closed),
                priority: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn test_bulk_assign_sets_pending() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let a = create_ticket(&app, &team.customer, "A", Priority::Low).await;
    let b = create_ticket(&app, &team.customer, "B", Priority::Low).await;

    let result = service
        .bulk_assign(
            &team.admin,
            BulkAssign {
                ticket_ids: vec![a.id.clone(), b.id.clone(), a.id.clone()],
                assignee_id: Some(team.agent.user_id.clone()),
            },
        )
        .await
        .unwrap();
    // Duplicate ids are processed once
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 0);

    for id in [&a.id, &b.id] {
        let ticket = service.get_ticket(&team.agent, id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Pending);
        assert_eq!(ticket.assignee_id.as_deref(), Some(team.agent.user_id.as_str()));
    }
}

#[tokio::test]
async fn test_bulk_delete_requires_admin_and_confirmation() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let a = create_ticket(&app, &team.customer, "A", Priority::Low).await;
    service
        .add_message(
            &team.agent,
            &a.id,
            AddMessage {
                body: "hello".into(),
                is_internal: false,
            },
        )
        .await
        .unwrap();

    let request = BulkDelete {
        ticket_ids: vec![a.id.clone(), "missing".into()],
        permanent: false,
    };
    let err = service.bulk_delete(&team.admin, request.clone()).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let err = service
        .bulk_delete(
            &team.agent,
            BulkDelete {
                permanent: true,
                ..request.clone()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let result = service
        .bulk_delete(
            &team.admin,
            BulkDelete {
                permanent: true,
                ..request
            },
        )
        .await
        .unwrap();
    assert_eq!(result.success_count, 1);
    assert_eq!(result.failure_count, 1);

    let err = service.get_ticket(&team.admin, &a.id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_merge_copies_messages_and_closes_secondary() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let primary = create_ticket(&app, &team.customer, "A", Priority::Medium).await;
    let secondary = create_ticket(&app, &team.customer, "B", Priority::Medium).await;

    let first = service
        .add_message(
            &team.customer,
            &secondary.id,
            AddMessage {
                body: "first".into(),
                is_internal: false,
            },
        )
        .await
        .unwrap();
    app.clock.advance(chrono::Duration::minutes(1));
    service
        .add_message(
            &team.agent,
            &secondary.id,
            AddMessage {
                body: "second".into(),
                is_internal: false,
            },
        )
        .await
        .unwrap();

    let result = service
        .merge_tickets(
            &team.agent,
            &primary.id,
            MergeTickets {
                secondary_ticket_ids: vec![secondary.id.clone()],
                merge_comments: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(result.success_count, 1);
    assert_eq!(result.failure_count, 0);

    let copied = service.list_messages(&team.agent, &primary.id).await.unwrap();
    assert_eq!(copied.len(), 2);
    assert_eq!(copied[0].body, "first");
    assert_eq!(copied[0].author_id, team.customer.user_id);
    assert_eq!(copied[0].created_at, first.created_at);
    assert_eq!(copied[0].copied_from_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(copied[1].body, "second");

    let closed = service.get_ticket(&team.agent, &secondary.id).await.unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);
    assert_eq!(closed.merged_into_id.as_deref(), Some(primary.id.as_str()));
    assert!(closed.closed_at.is_some());

    let untouched = service.get_ticket(&team.agent, &primary.id).await.unwrap();
    assert_eq!(untouched.status, TicketStatus::Open);

    let timeline = service.get_timeline(&team.agent, &secondary.id).await.unwrap();
    let last = timeline.last().unwrap();
    assert_eq!(last.action, ActivityAction::Closed);
    assert_eq!(last.metadata["merged_into"], primary.id.as_str());
}

#[tokio::test]
async fn test_merge_without_comments_and_rejections() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let primary = create_ticket(&app, &team.customer, "A", Priority::Medium).await;
    let resolved = create_ticket(&app, &team.customer, "B", Priority::Medium).await;
    service
        .add_message(
            &team.customer,
            &resolved.id,
            AddMessage {
                body: "context".into(),
                is_internal: false,
            },
        )
        .await
        .unwrap();
    service.resolve_ticket(&team.agent, &resolved.id).await.unwrap();

    let err = service
        .merge_tickets(
            &team.agent,
            &primary.id,
            MergeTickets {
                secondary_ticket_ids: vec![primary.id.clone()],
                merge_comments: false,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let result = service
        .merge_tickets(
            &team.agent,
            &primary.id,
            MergeTickets {
                secondary_ticket_ids: vec![resolved.id.clone(), "missing".into()],
                merge_comments: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(result.success_count, 1);
    assert_eq!(result.failure_count, 1);

    assert!(service.list_messages(&team.agent, &primary.id).await.unwrap().is_empty());
    let closed = service.get_ticket(&team.agent, &resolved.id).await.unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);

    // A ticket can only be merged once
    let again = service
        .merge_tickets(
            &team.agent,
            &primary.id,
            MergeTickets {
                secondary_ticket_ids: vec![resolved.id.clone()],
                merge_comments: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(again.failure_count, 1);
}

#[tokio::test]
async fn test_failed_merge_leaves_no_copies_behind() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    let primary = create_ticket(&app, &team.customer, "A", Priority::Medium).await;
    let secondary = create_ticket(&app, &team.customer, "B", Priority::Medium).await;
    for body in ["first", "second"] {
        service
            .add_message(
                &team.customer,
                &secondary.id,
                AddMessage {
                    body: body.into(),
                    is_internal: false,
                },
            )
            .await
            .unwrap();
    }

    // The merge activity is the last write of the merge; make it fail
    sqlx::query(
        "CREATE TRIGGER reject_merge_activity BEFORE INSERT ON ticket_activities
         WHEN NEW.metadata LIKE '%merged_into%'
         BEGIN SELECT RAISE(ABORT, 'activity log unavailable'); END",
    )
    .execute(app.db().pool())
    .await
    .unwrap();

    let request = || MergeTickets {
        secondary_ticket_ids: vec![secondary.id.clone()],
        merge_comments: true,
    };
    let failed = service
        .merge_tickets(&team.agent, &primary.id, request())
        .await
        .unwrap();
    assert_eq!(failed.failure_count, 1);
    assert!(failed.errors.contains_key(&secondary.id));

    assert!(service.list_messages(&team.agent, &primary.id).await.unwrap().is_empty());
    let still_open = service.get_ticket(&team.agent, &secondary.id).await.unwrap();
    assert_eq!(still_open.status, TicketStatus::Open);
    assert!(still_open.merged_into_id.is_none());

    sqlx::query("DROP TRIGGER reject_merge_activity")
        .execute(app.db().pool())
        .await
        .unwrap();

    let retried = service
        .merge_tickets(&team.agent, &primary.id, request())
        .await
        .unwrap();
    assert_eq!(retried.success_count, 1);

    // Copied exactly once
    let copied = service.list_messages(&team.agent, &primary.id).await.unwrap();
    assert_eq!(copied.len(), 2);
    let merged = service.get_ticket(&team.agent, &secondary.id).await.unwrap();
    assert_eq!(merged.merged_into_id.as_deref(), Some(primary.id.as_str()));
}
