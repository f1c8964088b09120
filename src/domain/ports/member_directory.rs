use crate::domain::entities::{Member, Role};
use crate::infrastructure::http::middleware::error::ApiResult;

/// Read access to organization memberships. Membership CRUD is owned by the
/// identity service; `sync_member` is its write hook into this store.
#[async_trait::async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn find_member(&self, organization_id: &str, user_id: &str)
        -> ApiResult<Option<Member>>;
    async fn list_members_with_role(&self, organization_id: &str, role: Role)
        -> ApiResult<Vec<Member>>;
    async fn sync_member(&self, member: &Member) -> ApiResult<()>;
}
