mod helpers;

use chrono::Duration;
use helpers::*;
use ticketcore::domain::entities::*;
use ticketcore::infrastructure::http::middleware::ApiError;

#[tokio::test]
async fn test_create_ticket_numbers_and_defaults() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let other = seed_org(&app, OTHER_ORG, "starter").await;

    let first = create_ticket(&app, &team.customer, "Cannot log in", Priority::Medium).await;
    let second = create_ticket(&app, &team.customer, "Invoice wrong", Priority::Low).await;
    let foreign = create_ticket(&app, &other.customer, "Other tenant", Priority::Low).await;

    assert_eq!(first.number, 1);
    assert_eq!(second.number, 2);
    // Numbering is per organization
    assert_eq!(foreign.number, 1);

    assert_eq!(first.status, TicketStatus::Open);
    assert_eq!(first.customer_id, team.customer.user_id);
    assert_eq!(first.sla_deadline, Some(start_time() + Duration::hours(8)));
    assert!(!first.sla_breached);

    let actions = timeline_actions(&app, &team.agent, &first.id).await;
    assert_eq!(actions, vec![ActivityAction::Created]);

    let usage = app
        .services
        .usage_service
        .current_usage(ORG)
        .await
        .unwrap();
    assert_eq!(usage.tickets_used, 2);
    assert_eq!(usage.tickets_remaining, 498);
}

#[tokio::test]
async fn test_agent_opens_ticket_for_customer() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;

    let mut request = ticket_request("Phone call follow-up", Priority::High);
    request.customer_id = Some(team.customer.user_id.clone());
    request.channel = Some(Channel::Phone);
    let ticket = app
        .services
        .ticket_service
        .create_ticket(&team.agent, request)
        .await
        .unwrap();
    assert_eq!(ticket.customer_id, team.customer.user_id);
    assert_eq!(ticket.channel, Channel::Phone);

    // Customers cannot open tickets in someone else's name
    let mut request = ticket_request("Impersonation", Priority::Low);
    request.customer_id = Some(team.other_customer.user_id.clone());
    let err = app
        .services
        .ticket_service
        .create_ticket(&team.customer, request)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn test_empty_title_is_rejected() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;

    let err = app
        .services
        .ticket_service
        .create_ticket(&team.customer, ticket_request("   ", Priority::Low))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BAD_REQUEST");
}

#[tokio::test]
async fn test_close_and_reopen_maintain_timestamps() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;
    let ticket = create_ticket(&app, &team.customer, "Printer on fire", Priority::High).await;

    app.clock.advance(Duration::minutes(30));
    let resolved = service.resolve_ticket(&team.agent, &ticket.id).await.unwrap();
    let resolved_at = resolved.resolved_at.expect("resolved_at stamped");
    assert!(resolved.closed_at.is_none());

    app.clock.advance(Duration::minutes(30));
    let closed = service.close_ticket(&team.customer, &ticket.id).await.unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);
    assert_eq!(closed.resolved_at, Some(resolved_at));
    assert!(closed.closed_at.is_some());

    // Closing twice is forbidden
    let err = service.close_ticket(&team.agent, &ticket.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let reopened = service.reopen_ticket(&team.customer, &ticket.id).await.unwrap();
    assert_eq!(reopened.status, TicketStatus::Open);
    assert!(reopened.closed_at.is_none());
    assert!(reopened.resolved_at.is_none());

    // Reopening a ticket that is not closed is forbidden
    let err = service.reopen_ticket(&team.customer, &ticket.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let stored = service.get_ticket(&team.agent, &ticket.id).await.unwrap();
    assert_eq!(stored, reopened);

    let actions = timeline_actions(&app, &team.agent, &ticket.id).await;
    assert_eq!(
        actions,
        vec![
            ActivityAction::Created,
            ActivityAction::Resolved,
            ActivityAction::Closed,
            ActivityAction::Reopened,
        ]
    );
}

#[tokio::test]
async fn test_invalid_transition_is_bad_request() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;
    let ticket = create_ticket(&app, &team.customer, "Refund", Priority::Low).await;

    service.resolve_ticket(&team.agent, &ticket.id).await.unwrap();
    let err = service
        .update_ticket(
            &team.agent,
            &ticket.id,
            UpdateTicket {
                status: Some(TicketStatus::Pending),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn test_update_logs_each_changed_field() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;
    let ticket = create_ticket(&app, &team.customer, "Slow dashboard", Priority::Low).await;

    let updated = service
        .update_ticket(
            &team.agent,
            &ticket.id,
            UpdateTicket {
                status: Some(TicketStatus::Pending),
                priority: Some(Priority::Urgent),
                tags: Some(vec!["Performance".into(), "performance".into()]),
                category: Some("bug".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, TicketStatus::Pending);
    assert_eq!(updated.priority, Priority::Urgent);
    assert_eq!(updated.tags, vec!["performance"]);
    assert_eq!(updated.category.as_deref(), Some("bug"));

    let timeline = service.get_timeline(&team.agent, &ticket.id).await.unwrap();
    let actions: Vec<_> = timeline.iter().map(|a| a.action).collect();
    assert_eq!(
        actions,
        vec![
            ActivityAction::Created,
            ActivityAction::StatusChanged,
            ActivityAction::PriorityChanged,
            ActivityAction::Tagged,
        ]
    );
    assert_eq!(timeline[2].metadata["from"], "low");
    assert_eq!(timeline[2].metadata["to"], "urgent");

    // Re-applying the same values records nothing new
    service
        .update_ticket(
            &team.agent,
            &ticket.id,
            UpdateTicket {
                priority: Some(Priority::Urgent),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(timeline_actions(&app, &team.agent, &ticket.id).await.len(), 4);

    // Customers cannot edit tickets
    let err = service
        .update_ticket(
            &team.customer,
            &ticket.id,
            UpdateTicket {
                priority: Some(Priority::Low),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn test_assignment_moves_status() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;
    let ticket = create_ticket(&app, &team.customer, "VPN down", Priority::High).await;

    let assigned = service
        .assign_ticket(&team.admin, &ticket.id, Some(team.agent.user_id.clone()))
        .await
        .unwrap();
    assert_eq!(assigned.assignee_id.as_deref(), Some(team.agent.user_id.as_str()));
    assert_eq!(assigned.status, TicketStatus::Pending);

    let unassigned = service.assign_ticket(&team.admin, &ticket.id, None).await.unwrap();
    assert!(unassigned.assignee_id.is_none());
    assert_eq!(unassigned.status, TicketStatus::Open);

    assert_eq!(
        timeline_actions(&app, &team.agent, &ticket.id).await,
        vec![
            ActivityAction::Created,
            ActivityAction::Assigned,
            ActivityAction::StatusChanged,
            ActivityAction::Unassigned,
            ActivityAction::StatusChanged,
        ]
    );

    // Customers are not assignable
    let err = service
        .assign_ticket(&team.admin, &ticket.id, Some(team.customer.user_id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    // Assignment past pending leaves the status alone
    service.resolve_ticket(&team.agent, &ticket.id).await.unwrap();
    let resolved = service
        .assign_ticket(&team.admin, &ticket.id, Some(team.agent.user_id.clone()))
        .await
        .unwrap();
    assert_eq!(resolved.status, TicketStatus::Resolved);
}

#[tokio::test]
async fn test_assignment_notifies_assignee_once() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;
    let ticket = create_ticket(&app, &team.customer, "Export broken", Priority::Medium).await;

    service
        .assign_ticket(&team.admin, &ticket.id, Some(team.agent.user_id.clone()))
        .await
        .unwrap();
    app.run_due_jobs().await;

    let inbox = app.notifications_for(&team.agent.user_id).await;
    let assigned: Vec<_> = inbox
        .iter()
        .filter(|n| n.kind == NotificationKind::TicketAssigned)
        .collect();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].context["ticket_id"], ticket.id.as_str());

    // The customer hears about the open -> pending move; the acting admin hears nothing
    let customer_inbox = app.notifications_for(&team.customer.user_id).await;
    assert!(customer_inbox
        .iter()
        .any(|n| n.kind == NotificationKind::TicketStatusChanged));
    assert!(app.notifications_for(&team.admin.user_id).await.is_empty());
}

#[tokio::test]
async fn test_tenant_and_ownership_isolation() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let other = seed_org(&app, OTHER_ORG, "starter").await;
    let service = &app.services.ticket_service;

    let mine = create_ticket(&app, &team.customer, "Mine", Priority::Low).await;
    create_ticket(&app, &team.other_customer, "Theirs", Priority::Low).await;

    let err = service.get_ticket(&team.other_customer, &mine.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let err = service.get_ticket(&other.admin, &mine.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let err = service.get_ticket(&team.agent, "missing").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let customer_view = service
        .list_tickets(&team.customer, TicketFilter::default(), 1, 20)
        .await
        .unwrap();
    assert_eq!(customer_view.pagination.total_count, 1);
    assert_eq!(customer_view.tickets[0].id, mine.id);

    let agent_view = service
        .list_tickets(&team.agent, TicketFilter::default(), 1, 20)
        .await
        .unwrap();
    assert_eq!(agent_view.pagination.total_count, 2);
    // Newest first
    assert_eq!(agent_view.tickets[0].title, "Theirs");
}

#[tokio::test]
async fn test_list_pagination_and_filters() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;

    for i in 0..5 {
        let priority = if i % 2 == 0 { Priority::High } else { Priority::Low };
        create_ticket(&app, &team.customer, &format!("Ticket {}", i), priority).await;
        app.clock.advance(Duration::seconds(1));
    }

    let page = service
        .list_tickets(&team.agent, TicketFilter::default(), 2, 2)
        .await
        .unwrap();
    assert_eq!(page.pagination.total_count, 5);
    assert_eq!(page.pagination.total_pages, 3);
    let titles: Vec<_> = page.tickets.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Ticket 2", "Ticket 1"]);

    let high = service
        .list_tickets(
            &team.agent,
            TicketFilter {
                priority: Some(Priority::High),
                ..Default::default()
            },
            1,
            1000,
        )
        .await
        .unwrap();
    assert_eq!(high.pagination.total_count, 3);
    assert_eq!(high.pagination.per_page, 100);
}

#[tokio::test]
async fn test_messages_and_first_response() {
    let app = setup_app().await;
    let team = seed_org(&app, ORG, "starter").await;
    let service = &app.services.ticket_service;
    let ticket = create_ticket(&app, &team.customer, "Password reset", Priority::Medium).await;

    service
        .add_message(
            &team.customer,
            &ticket.id,
            AddMessage {
                body: "Any news?".into(),
                is_internal: false,
            },
        )
        .await
        .unwrap();
    assert!(service
        .get_ticket(&team.agent, &ticket.id)
        .await
        .unwrap()
        .first_response_at
        .is_none());

    // Internal notes do not count as a response
    app.clock.advance(Duration::minutes(5));
    service
        .add_message(
            &team.agent,
            &ticket.id,
            AddMessage {
                body: "Checking with billing".into(),
                is_internal: true,
            },
        )
        .await
        .unwrap();
    assert!(service
        .get_ticket(&team.agent, &ticket.id)
        .await
        .unwrap()
        .first_response_at
        .is_none());

    app.clock.advance(Duration::minutes(5));
    let reply_time = app.clock.advance(Duration::minutes(1));
    service
        .add_message(
            &team.agent,
            &ticket.id,
            AddMessage {
                body: "Reset link sent".into(),
                is_internal: false,
            },
        )
        .await
        .unwrap();
    let stored = service.get_ticket(&team.agent, &ticket.id).await.unwrap();
    assert_eq!(stored.first_response_at, Some(reply_time));

    let err = service
        .add_message(
            &team.customer,
            &ticket.id,
            AddMessage {
                body: "sneaky".into(),
                is_internal: true,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    assert_eq!(service.list_messages(&team.agent, &ticket.id).await.unwrap().len(), 3);
    let customer_view = service.list_messages(&team.customer, &ticket.id).await.unwrap();
    assert_eq!(customer_view.len(), 2);
    assert!(customer_view.iter().all(|m| !m.is_internal));

    let usage = app.services.usage_service.current_usage(ORG).await.unwrap();
    assert_eq!(usage.messages_used, 3);
}
