use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::application::services::{SlaService, SubscriptionService, TicketService, UsageService};
use crate::domain::entities::{Actor, Role};
use crate::infrastructure::http::middleware::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ORGANIZATION_ID_HEADER: &str = "x-organization-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct AppState {
    pub ticket_service: TicketService,
    pub sla_service: SlaService,
    pub usage_service: UsageService,
    pub subscription_service: SubscriptionService,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Identity comes from the session layer in front of this service, which
/// forwards the caller as three headers.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let user_id = header(headers, USER_ID_HEADER).ok_or(ApiError::Unauthorized)?;
    let organization_id = header(headers, ORGANIZATION_ID_HEADER).ok_or(ApiError::Unauthorized)?;
    let role: Role = header(headers, USER_ROLE_HEADER)
        .ok_or(ApiError::Unauthorized)?
        .parse()
        .map_err(|_| ApiError::Unauthorized)?;

    Ok(Actor::new(user_id, organization_id, role))
}

pub async fn require_actor(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let actor = actor_from_headers(request.headers())?;
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}
