use crate::infrastructure::http::controllers::{sla, subscriptions, tickets, usage};
use crate::infrastructure::http::middleware::{require_actor, AppState};
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    // Every API route needs a caller identity
    let protected = Router::new()
        .route(
            "/api/tickets",
            get(tickets::list_tickets).post(tickets::create_ticket),
        )
        .route("/api/tickets/bulk/update", post(tickets::bulk_update))
        .route("/api/tickets/bulk/assign", post(tickets::bulk_assign))
        .route("/api/tickets/bulk/delete", post(tickets::bulk_delete))
        .route(
            "/api/tickets/:id",
            get(tickets::get_ticket).patch(tickets::update_ticket),
        )
        .route("/api/tickets/:id/resolve", post(tickets::resolve_ticket))
        .route("/api/tickets/:id/close", post(tickets::close_ticket))
        .route("/api/tickets/:id/reopen", post(tickets::reopen_ticket))
        .route("/api/tickets/:id/assign", post(tickets::assign_ticket))
        .route(
            "/api/tickets/:id/messages",
            get(tickets::list_messages).post(tickets::add_message),
        )
        .route("/api/tickets/:id/activities", get(tickets::get_timeline))
        .route("/api/tickets/:id/merge", post(tickets::merge_tickets))
        .route(
            "/api/sla-policies",
            get(sla::list_sla_policies).post(sla::create_sla_policy),
        )
        .route("/api/sla-policies/:id", delete(sla::delete_sla_policy))
        .route("/api/usage", get(usage::get_current_usage))
        .route("/api/usage/history", get(usage::get_usage_history))
        .route("/api/usage/check/:dimension", get(usage::check_limit))
        .route(
            "/api/usage/:dimension/increment",
            post(usage::increment_usage),
        )
        .route("/api/usage/reset", post(usage::reset_usage))
        .route(
            "/api/subscription",
            get(subscriptions::get_subscription).post(subscriptions::subscribe),
        )
        .route(
            "/api/subscription/change-plan",
            post(subscriptions::change_plan),
        )
        .route(
            "/api/subscription/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/api/subscription/reactivate",
            post(subscriptions::reactivate_subscription),
        )
        .layer(axum::middleware::from_fn(require_actor));

    // Build public routes
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/plans", get(subscriptions::list_plans))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler() -> &'static str {
    "ticketcore support ticketing service"
}

async fn health_handler() -> &'static str {
    "OK"
}
