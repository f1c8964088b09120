use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;

use crate::domain::entities::*;
use crate::infrastructure::http::middleware::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ListTicketsQuery {
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    pub assignee_id: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    pub assignee_id: Option<String>,
}

// POST /api/tickets
pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateTicket>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    let ticket = state.ticket_service.create_ticket(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

// GET /api/tickets
pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListTicketsQuery>,
) -> ApiResult<Json<TicketListResponse>> {
    let filter = TicketFilter {
        status: query.status,
        priority: query.priority,
        assignee_id: query.assignee_id,
        customer_id: None,
    };
    let response = state
        .ticket_service
        .list_tickets(
            &actor,
            filter,
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(20),
        )
        .await?;
    Ok(Json(response))
}

// GET /api/tickets/:id
pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state.ticket_service.get_ticket(&actor, &ticket_id).await?;
    Ok(Json(ticket))
}

// PATCH /api/tickets/:id
pub async fn update_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    Json(request): Json<UpdateTicket>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state
        .ticket_service
        .update_ticket(&actor, &ticket_id, request)
        .await?;
    Ok(Json(ticket))
}

// POST /api/tickets/:id/resolve
pub async fn resolve_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state.ticket_service.resolve_ticket(&actor, &ticket_id).await?;
    Ok(Json(ticket))
}

// POST /api/tickets/:id/close
pub async fn close_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state.ticket_service.close_ticket(&actor, &ticket_id).await?;
    Ok(Json(ticket))
}

// POST /api/tickets/:id/reopen
pub async fn reopen_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state.ticket_service.reopen_ticket(&actor, &ticket_id).await?;
    Ok(Json(ticket))
}

// POST /api/tickets/:id/assign
pub async fn assign_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    Json(request): Json<AssignTicketRequest>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state
        .ticket_service
        .assign_ticket(&actor, &ticket_id, request.assignee_id)
        .await?;
    Ok(Json(ticket))
}

// POST /api/tickets/:id/messages
pub async fn add_message(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    Json(request): Json<AddMessage>,
) -> ApiResult<(StatusCode, Json<TicketMessage>)> {
    let message = state
        .ticket_service
        .add_message(&actor, &ticket_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

// GET /api/tickets/:id/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<Vec<TicketMessage>>> {
    let messages = state.ticket_service.list_messages(&actor, &ticket_id).await?;
    Ok(Json(messages))
}

// GET /api/tickets/:id/activities
pub async fn get_timeline(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<Vec<Activity>>> {
    let activities = state.ticket_service.get_timeline(&actor, &ticket_id).await?;
    Ok(Json(activities))
}

// POST /api/tickets/:id/merge
pub async fn merge_tickets(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    Json(request): Json<MergeTickets>,
) -> ApiResult<Json<BulkResult>> {
    let result = state
        .ticket_service
        .merge_tickets(&actor, &ticket_id, request)
        .await?;
    Ok(Json(result))
}

// POST /api/tickets/bulk/update
pub async fn bulk_update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BulkUpdate>,
) -> ApiResult<Json<BulkResult>> {
    Ok(Json(state.ticket_service.bulk_update(&actor, request).await?))
}

// POST /api/tickets/bulk/assign
pub async fn bulk_assign(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BulkAssign>,
) -> ApiResult<Json<BulkResult>> {
    Ok(Json(state.ticket_service.bulk_assign(&actor, request).await?))
}

// POST /api/tickets/bulk/delete
pub async fn bulk_delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BulkDelete>,
) -> ApiResult<Json<BulkResult>> {
    Ok(Json(state.ticket_service.bulk_delete(&actor, request).await?))
}
