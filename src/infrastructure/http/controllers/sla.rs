use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};

use crate::domain::entities::{Actor, CreateSlaPolicy, SlaPolicy};
use crate::infrastructure::http::middleware::{ApiResult, AppState};

// POST /api/sla-policies
pub async fn create_sla_policy(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateSlaPolicy>,
) -> ApiResult<(StatusCode, Json<SlaPolicy>)> {
    let policy = state.sla_service.create_policy(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

// GET /api/sla-policies
pub async fn list_sla_policies(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<SlaPolicy>>> {
    Ok(Json(state.sla_service.list_policies(&actor).await?))
}

// DELETE /api/sla-policies/:id
pub async fn delete_sla_policy(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(policy_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sla_service.delete_policy(&actor, &policy_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
