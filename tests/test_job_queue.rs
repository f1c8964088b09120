mod helpers;

use chrono::Duration;
use helpers::*;
use serde_json::json;
use tokio_test::assert_ok;
use ticketcore::domain::entities::*;
use ticketcore::domain::ports::task_queue::TaskQueue;
use ticketcore::infrastructure::http::middleware::ApiError;
use ticketcore::infrastructure::workers::QueueSettings;

fn settings() -> QueueSettings {
    QueueSettings {
        max_attempts: 3,
        retry_backoff: Duration::seconds(30),
        lock_timeout: Duration::minutes(5),
    }
}

#[tokio::test]
async fn test_failing_job_retries_then_fails() {
    let app = setup_app_with(settings()).await;
    let queue = &app.services.queue;

    let job_id = queue
        .enqueue(JobKind::DeliverNotification, Some(ORG), json!({ "bogus": true }))
        .await
        .unwrap();

    assert_eq!(app.run_due_jobs().await, 1);
    let job = queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.run_at, start_time() + Duration::seconds(30));
    assert!(job.last_error.unwrap().contains("Malformed job payload"));

    // Not due again until the backoff elapses
    assert_eq!(app.run_due_jobs().await, 0);

    let second_try = app.clock.advance(Duration::seconds(30));
    assert_eq!(app.run_due_jobs().await, 1);
    let job = queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
    // Backoff is fixed, not growing
    assert_eq!(job.run_at, second_try + Duration::seconds(30));

    app.clock.advance(Duration::seconds(30));
    assert_eq!(app.run_due_jobs().await, 1);
    let job = queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.locked_until.is_none());

    app.clock.advance(Duration::hours(1));
    assert_eq!(app.run_due_jobs().await, 0);
    let failed = queue
        .list_jobs(JobKind::DeliverNotification, JobStatus::Failed)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed() {
    let app = setup_app_with(settings()).await;
    let queue = &app.services.queue;

    let job_id = queue
        .enqueue(
            JobKind::SlaCheck,
            Some(ORG),
            json!({
                "ticket_id": "gone",
                "organization_id": ORG,
                "deadline": start_time(),
            }),
        )
        .await
        .unwrap();

    let leased = assert_ok!(queue.fetch_next_job().await).unwrap();
    assert_eq!(leased.id, job_id);
    assert_eq!(leased.status, JobStatus::Processing);
    assert_eq!(leased.attempts, 0);
    assert_eq!(leased.locked_until, Some(start_time() + Duration::minutes(5)));

    // Held by the first worker
    assert!(queue.fetch_next_job().await.unwrap().is_none());
    app.clock.advance(Duration::minutes(4));
    assert!(queue.fetch_next_job().await.unwrap().is_none());

    // The worker died; once the lease lapses another one takes over
    app.clock.advance(Duration::minutes(1) + Duration::seconds(1));
    let reclaimed = queue.fetch_next_job().await.unwrap().unwrap();
    assert_eq!(reclaimed.id, job_id);
    assert_eq!(reclaimed.attempts, 1);

    assert_ok!(queue.complete_job(&job_id).await);
    let done = assert_ok!(queue.get_job(&job_id).await).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.locked_until.is_none());
    assert!(queue.fetch_next_job().await.unwrap().is_none());
}

#[tokio::test]
async fn test_job_that_never_finishes_is_failed() {
    let app = setup_app_with(settings()).await;
    let queue = &app.services.queue;

    let job_id = queue
        .enqueue(
            JobKind::SlaCheck,
            Some(ORG),
            json!({
                "ticket_id": "crashes-its-worker",
                "organization_id": ORG,
                "deadline": start_time(),
            }),
        )
        .await
        .unwrap();

    // Every worker that leases it dies before completing
    let mut leases = 0;
    for _ in 0..10 {
        if assert_ok!(queue.fetch_next_job().await).is_some() {
            leases += 1;
        }
        app.clock.advance(Duration::minutes(6));
    }
    assert_eq!(leases, 3);

    let job = assert_ok!(queue.get_job(&job_id).await).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.locked_until.is_none());
    assert!(job.last_error.unwrap().contains("Lease expired"));
    assert!(queue.fetch_next_job().await.unwrap().is_none());
}

#[tokio::test]
async fn test_delayed_jobs_wait_until_due() {
    let app = setup_app().await;
    let queue = &app.services.queue;

    let later = queue
        .enqueue_at(
            JobKind::SlaCheck,
            Some(ORG),
            json!({
                "ticket_id": "later",
                "organization_id": ORG,
                "deadline": start_time() + Duration::hours(2),
            }),
            start_time() + Duration::hours(2),
        )
        .await
        .unwrap();
    let sooner = queue
        .enqueue_at(
            JobKind::SlaCheck,
            Some(ORG),
            json!({
                "ticket_id": "sooner",
                "organization_id": ORG,
                "deadline": start_time() + Duration::hours(1),
            }),
            start_time() + Duration::hours(1),
        )
        .await
        .unwrap();

    assert!(queue.fetch_next_job().await.unwrap().is_none());

    app.clock.advance(Duration::hours(3));
    // Oldest due first
    assert_eq!(queue.fetch_next_job().await.unwrap().unwrap().id, sooner);
    assert_eq!(queue.fetch_next_job().await.unwrap().unwrap().id, later);
}

#[tokio::test]
async fn test_repeated_delivery_is_deduplicated() {
    let app = setup_app().await;
    let queue = &app.services.queue;

    let notification = OutboundNotification {
        recipient_user_id: "org-acme-admin".into(),
        organization_id: ORG.into(),
        kind: NotificationKind::TicketAssigned,
        title: "Ticket #1 assigned to you".into(),
        message: "Printer on fire".into(),
        context: json!({ "ticket_number": 1 }),
        dedupe_key: "ticket_assigned:t-1:org-acme-admin".into(),
    };
    for _ in 0..2 {
        queue
            .enqueue(
                JobKind::DeliverNotification,
                Some(ORG),
                serde_json::to_value(&notification).unwrap(),
            )
            .await
            .unwrap();
    }

    assert_eq!(app.run_due_jobs().await, 2);
    let inbox = app.notifications_for("org-acme-admin").await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].dedupe_key, notification.dedupe_key);
    assert!(!inbox[0].is_read);

    // Both jobs completed; the duplicate is not a failure
    let completed = queue
        .list_jobs(JobKind::DeliverNotification, JobStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.len(), 2);
}

#[tokio::test]
async fn test_corrupt_payload_is_reported() {
    let app = setup_app().await;
    let queue = &app.services.queue;

    let job_id = queue
        .enqueue(JobKind::DeliverNotification, Some(ORG), json!({}))
        .await
        .unwrap();
    sqlx::query("UPDATE jobs SET payload = '{not json' WHERE id = ?")
        .bind(&job_id)
        .execute(app.db().pool())
        .await
        .unwrap();

    let err = queue.get_job(&job_id).await.unwrap_err();
    assert!(matches!(err, ApiError::Internal(_)));
}
