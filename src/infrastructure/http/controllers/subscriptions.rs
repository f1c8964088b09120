use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Deserialize;

use crate::domain::entities::{Actor, Plan, PlanChange, Subscription};
use crate::domain::services::{ensure, Capability};
use crate::infrastructure::http::middleware::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub plan_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub at_period_end: bool,
}

// GET /api/plans
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<Plan>> {
    let plans = state
        .subscription_service
        .catalog()
        .active_plans()
        .into_iter()
        .cloned()
        .collect();
    Json(plans)
}

// GET /api/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Subscription>> {
    ensure(&actor, Capability::ViewUsage)?;
    let subscription = state
        .subscription_service
        .get_subscription(&actor.organization_id)
        .await?;
    Ok(Json(subscription))
}

// POST /api/subscription
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<SubscribeRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    ensure(&actor, Capability::ManageSubscription)?;
    let subscription = state
        .subscription_service
        .subscribe(&actor.organization_id, request.plan_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

// POST /api/subscription/change-plan
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<ChangePlanRequest>,
) -> ApiResult<Json<PlanChange>> {
    ensure(&actor, Capability::ManageSubscription)?;
    let change = state
        .subscription_service
        .change_plan(&actor.organization_id, &request.plan_id)
        .await?;
    Ok(Json(change))
}

// POST /api/subscription/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<Subscription>> {
    ensure(&actor, Capability::ManageSubscription)?;
    let subscription = state
        .subscription_service
        .cancel(&actor.organization_id, request.at_period_end)
        .await?;
    Ok(Json(subscription))
}

// POST /api/subscription/reactivate
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<Subscription>> {
    ensure(&actor, Capability::ManageSubscription)?;
    let subscription = state
        .subscription_service
        .reactivate(&actor.organization_id)
        .await?;
    Ok(Json(subscription))
}
