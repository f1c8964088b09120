use axum::{
    extract::{Path, State},
    Extension, Json,
};

use crate::domain::entities::{Actor, Dimension, IncrementUsage, QuotaCheck, UsageRecord};
use crate::domain::services::{ensure, Capability};
use crate::infrastructure::http::middleware::{ApiResult, AppState};

// GET /api/usage
pub async fn get_current_usage(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<UsageRecord>> {
    ensure(&actor, Capability::ViewUsage)?;
    let record = state
        .usage_service
        .current_usage(&actor.organization_id)
        .await?;
    Ok(Json(record))
}

// GET /api/usage/history
pub async fn get_usage_history(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Vec<UsageRecord>>> {
    ensure(&actor, Capability::ViewUsage)?;
    let history = state
        .usage_service
        .usage_history(&actor.organization_id)
        .await?;
    Ok(Json(history))
}

// GET /api/usage/check/:dimension
pub async fn check_limit(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(dimension): Path<Dimension>,
) -> ApiResult<Json<QuotaCheck>> {
    ensure(&actor, Capability::ViewUsage)?;
    let check = state
        .usage_service
        .check_limit(&actor.organization_id, dimension)
        .await?;
    Ok(Json(check))
}

// POST /api/usage/:dimension/increment
pub async fn increment_usage(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(dimension): Path<Dimension>,
    Json(request): Json<IncrementUsage>,
) -> ApiResult<Json<UsageRecord>> {
    ensure(&actor, Capability::RecordUsage)?;
    let record = state
        .usage_service
        .increment_usage(&actor.organization_id, dimension, request.amount)
        .await?;
    Ok(Json(record))
}

// POST /api/usage/reset
pub async fn reset_usage(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<UsageRecord>> {
    ensure(&actor, Capability::ManageSubscription)?;
    let record = state
        .usage_service
        .reset_usage(&actor.organization_id)
        .await?;
    Ok(Json(record))
}
