use async_trait::async_trait;
use sqlx::{any::AnyRow, Row};

use crate::domain::entities::{Member, Role};
use crate::domain::ports::member_directory::MemberDirectory;
use crate::infrastructure::http::middleware::error::ApiResult;
use crate::infrastructure::persistence::Database;
use crate::shared::{parse_db_timestamp, to_db_timestamp};

fn row_to_member(row: &AnyRow) -> ApiResult<Member> {
    Ok(Member {
        organization_id: row.try_get("organization_id")?,
        user_id: row.try_get("user_id")?,
        role: row.try_get::<String, _>("role")?.parse()?,
        created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[async_trait]
impl MemberDirectory for Database {
    async fn find_member(&self, organization_id: &str, user_id: &str) -> ApiResult<Option<Member>> {
        let row = sqlx::query(
            "SELECT organization_id, user_id, role, created_at
             FROM organization_members
             WHERE organization_id = ? AND user_id = ?",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_member).transpose()
    }

    async fn list_members_with_role(
        &self,
        organization_id: &str,
        role: Role,
    ) -> ApiResult<Vec<Member>> {
        let rows = sqlx::query(
            "SELECT organization_id, user_id, role, created_at
             FROM organization_members
             WHERE organization_id = ? AND role = ?
             ORDER BY user_id",
        )
        .bind(organization_id)
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_member).collect()
    }

    async fn sync_member(&self, member: &Member) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO organization_members (organization_id, user_id, role, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(organization_id, user_id) DO UPDATE SET role = excluded.role",
        )
        .bind(&member.organization_id)
        .bind(&member.user_id)
        .bind(member.role.as_str())
        .bind(to_db_timestamp(member.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
