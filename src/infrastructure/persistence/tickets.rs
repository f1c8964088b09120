use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{any::AnyRow, AnyConnection, Row};

use crate::domain::entities::{Activity, Ticket, TicketFilter, TicketMessage};
use crate::domain::ports::ticket_repository::TicketRepository;
use crate::infrastructure::http::middleware::error::{ApiError, ApiResult};
use crate::infrastructure::persistence::{nullable_text, Database};
use crate::shared::{parse_db_timestamp, parse_db_timestamp_opt, to_db_timestamp, to_db_timestamp_opt};

const TICKET_COLUMNS: &str = "id, organization_id, number, title, description, status, priority, channel, \
     tags, category, customer_id, assignee_id, sla_deadline, first_response_at, sla_breached, \
     resolved_at, closed_at, merged_into_id, created_at, updated_at";

/// Attempts at allocating a ticket number before giving up on a unique clash
const NUMBER_ALLOCATION_ATTEMPTS: usize = 3;

fn row_to_ticket(row: &AnyRow) -> ApiResult<Ticket> {
    let tags: String = row.try_get("tags")?;
    Ok(Ticket {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        number: row.try_get("number")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        priority: row.try_get::<String, _>("priority")?.parse()?,
        channel: row.try_get::<String, _>("channel")?.parse()?,
        tags: serde_json::from_str(&tags)?,
        category: nullable_text(row, "category"),
        customer_id: row.try_get("customer_id")?,
        assignee_id: nullable_text(row, "assignee_id"),
        sla_deadline: parse_db_timestamp_opt(nullable_text(row, "sla_deadline"))?,
        first_response_at: parse_db_timestamp_opt(nullable_text(row, "first_response_at"))?,
        sla_breached: row.try_get::<i64, _>("sla_breached")? != 0,
        resolved_at: parse_db_timestamp_opt(nullable_text(row, "resolved_at"))?,
        closed_at: parse_db_timestamp_opt(nullable_text(row, "closed_at"))?,
        merged_into_id: nullable_text(row, "merged_into_id"),
        created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_db_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn row_to_message(row: &AnyRow) -> ApiResult<TicketMessage> {
    Ok(TicketMessage {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        author_id: row.try_get("author_id")?,
        body: row.try_get("body")?,
        is_internal: row.try_get::<i64, _>("is_internal")? != 0,
        copied_from_id: nullable_text(row, "copied_from_id"),
        created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn row_to_activity(row: &AnyRow) -> ApiResult<Activity> {
    let metadata: String = row.try_get("metadata")?;
    Ok(Activity {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        organization_id: row.try_get("organization_id")?,
        actor_id: nullable_text(row, "actor_id"),
        action: row.try_get::<String, _>("action")?.parse()?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

async fn insert_activity(conn: &mut AnyConnection, activity: &Activity) -> ApiResult<()> {
    sqlx::query(
        "INSERT INTO ticket_activities (id, ticket_id, organization_id, actor_id, action, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&activity.id)
    .bind(&activity.ticket_id)
    .bind(&activity.organization_id)
    .bind(&activity.actor_id)
    .bind(activity.action.as_str())
    .bind(serde_json::to_string(&activity.metadata)?)
    .bind(to_db_timestamp(activity.created_at))
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_message(conn: &mut AnyConnection, message: &TicketMessage) -> ApiResult<()> {
    sqlx::query(
        "INSERT INTO ticket_messages (id, ticket_id, author_id, body, is_internal, copied_from_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(&message.ticket_id)
    .bind(&message.author_id)
    .bind(&message.body)
    .bind(message.is_internal as i64)
    .bind(&message.copied_from_id)
    .bind(to_db_timestamp(message.created_at))
    .execute(conn)
    .await?;
    Ok(())
}

/// Write the mutable ticket columns. `guard` is appended to the WHERE clause;
/// returns the number of rows written.
async fn update_ticket_row(
    conn: &mut AnyConnection,
    ticket: &Ticket,
    reset_breach: bool,
    guard: &str,
) -> ApiResult<u64> {
    let sql = format!(
        "UPDATE tickets
         SET title = ?, description = ?, status = ?, priority = ?, tags = ?, category = ?,
             assignee_id = ?, sla_deadline = ?, first_response_at = COALESCE(first_response_at, ?),
             resolved_at = ?, closed_at = ?, merged_into_id = ?, updated_at = ?{}
         WHERE id = ?{}",
        if reset_breach { ", sla_breached = 0" } else { "" },
        guard
    );

    let result = sqlx::query(&sql)
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.status.as_str())
        .bind(ticket.priority.as_str())
        .bind(serde_json::to_string(&ticket.tags)?)
        .bind(&ticket.category)
        .bind(&ticket.assignee_id)
        .bind(to_db_timestamp_opt(ticket.sla_deadline))
        .bind(to_db_timestamp_opt(ticket.first_response_at))
        .bind(to_db_timestamp_opt(ticket.resolved_at))
        .bind(to_db_timestamp_opt(ticket.closed_at))
        .bind(&ticket.merged_into_id)
        .bind(to_db_timestamp(ticket.updated_at))
        .bind(&ticket.id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Append the WHERE clause for a ticket filter and collect its bind values.
fn filter_clause(organization_id: &str, filter: &TicketFilter) -> (String, Vec<String>) {
    let mut sql = String::from(" WHERE organization_id = ?");
    let mut binds = vec![organization_id.to_string()];

    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        binds.push(status.as_str().to_string());
    }
    if let Some(priority) = filter.priority {
        sql.push_str(" AND priority = ?");
        binds.push(priority.as_str().to_string());
    }
    if let Some(assignee_id) = &filter.assignee_id {
        sql.push_str(" AND assignee_id = ?");
        binds.push(assignee_id.clone());
    }
    if let Some(customer_id) = &filter.customer_id {
        sql.push_str(" AND customer_id = ?");
        binds.push(customer_id.clone());
    }
    (sql, binds)
}

impl Database {
    async fn try_insert_ticket(&self, ticket: &Ticket, activity: &Activity) -> ApiResult<Ticket> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO tickets (id, organization_id, number, title, description, status, priority, channel,
                                  tags, category, customer_id, assignee_id, sla_deadline, first_response_at,
                                  sla_breached, resolved_at, closed_at, merged_into_id, created_at, updated_at)
             VALUES (?, ?, (SELECT COALESCE(MAX(number), 0) + 1 FROM tickets WHERE organization_id = ?),
                     ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.id)
        .bind(&ticket.organization_id)
        .bind(&ticket.organization_id)
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.status.as_str())
        .bind(ticket.priority.as_str())
        .bind(ticket.channel.as_str())
        .bind(serde_json::to_string(&ticket.tags)?)
        .bind(&ticket.category)
        .bind(&ticket.customer_id)
        .bind(&ticket.assignee_id)
        .bind(to_db_timestamp_opt(ticket.sla_deadline))
        .bind(to_db_timestamp_opt(ticket.first_response_at))
        .bind(to_db_timestamp_opt(ticket.resolved_at))
        .bind(to_db_timestamp_opt(ticket.closed_at))
        .bind(&ticket.merged_into_id)
        .bind(to_db_timestamp(ticket.created_at))
        .bind(to_db_timestamp(ticket.updated_at))
        .execute(&mut *tx)
        .await?;

        insert_activity(&mut tx, activity).await?;

        let row = sqlx::query(&format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS))
            .bind(&ticket.id)
            .fetch_one(&mut *tx)
            .await?;
        let stored = row_to_ticket(&row)?;

        tx.commit().await?;
        Ok(stored)
    }
}

#[async_trait]
impl TicketRepository for Database {
    async fn create_ticket(&self, ticket: &Ticket, activity: &Activity) -> ApiResult<Ticket> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_insert_ticket(ticket, activity).await {
                // Two writers computed the same number; the unique index rejected one
                Err(ApiError::Conflict(msg)) if attempt < NUMBER_ALLOCATION_ATTEMPTS => {
                    tracing::warn!(
                        "Ticket number clash in organization {}: {}",
                        ticket.organization_id,
                        msg
                    );
                }
                other => return other,
            }
        }
    }

    async fn get_ticket(&self, id: &str) -> ApiResult<Option<Ticket>> {
        let row = sqlx::query(&format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn list_tickets(
        &self,
        organization_id: &str,
        filter: &TicketFilter,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<Ticket>> {
        let (clause, binds) = filter_clause(organization_id, filter);
        let sql = format!(
            "SELECT {} FROM tickets{} ORDER BY created_at DESC, number DESC LIMIT ? OFFSET ?",
            TICKET_COLUMNS, clause
        );

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_ticket).collect()
    }

    async fn count_tickets(&self, organization_id: &str, filter: &TicketFilter) -> ApiResult<i64> {
        let (clause, binds) = filter_clause(organization_id, filter);
        let sql = format!("SELECT COUNT(*) as count FROM tickets{}", clause);

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.try_get("count")?)
    }

    async fn save_ticket(
        &self,
        ticket: &Ticket,
        activities: &[Activity],
        reset_breach: bool,
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        if update_ticket_row(&mut tx, ticket, reset_breach, "").await? == 0 {
            return Err(ApiError::NotFound(format!("Ticket {} not found", ticket.id)));
        }

        for activity in activities {
            insert_activity(&mut tx, activity).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn merge_ticket(
        &self,
        secondary: &Ticket,
        copies: &[TicketMessage],
        activity: &Activity,
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated =
            update_ticket_row(&mut tx, secondary, false, " AND merged_into_id IS NULL").await?;
        if updated == 0 {
            return Err(ApiError::Conflict(format!(
                "Ticket {} was already merged",
                secondary.id
            )));
        }

        for message in copies {
            insert_message(&mut tx, message).await?;
        }
        insert_activity(&mut tx, activity).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_sla_breached(&self, ticket_id: &str, activity: &Activity) -> ApiResult<bool> {
        let mut tx = self.pool.begin().await?;
        let now = to_db_timestamp(activity.created_at);

        let result = sqlx::query(
            "UPDATE tickets
             SET sla_breached = 1, updated_at = ?
             WHERE id = ?
               AND sla_breached = 0
               AND status IN ('open', 'pending')
               AND first_response_at IS NULL
               AND sla_deadline IS NOT NULL
               AND sla_deadline < ?",
        )
        .bind(&now)
        .bind(ticket_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_activity(&mut tx, activity).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_ticket(&self, id: &str) -> ApiResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM ticket_messages WHERE ticket_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ticket_activities WHERE ticket_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tickets WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_message(
        &self,
        message: &TicketMessage,
        activity: &Activity,
        first_response_at: Option<DateTime<Utc>>,
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        insert_message(&mut tx, message).await?;
        insert_activity(&mut tx, activity).await?;

        sqlx::query(
            "UPDATE tickets
             SET first_response_at = COALESCE(first_response_at, ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(to_db_timestamp_opt(first_response_at))
        .bind(to_db_timestamp(message.created_at))
        .bind(&message.ticket_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_messages(&self, ticket_id: &str) -> ApiResult<Vec<TicketMessage>> {
        let rows = sqlx::query(
            "SELECT id, ticket_id, author_id, body, is_internal, copied_from_id, created_at
             FROM ticket_messages
             WHERE ticket_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn list_activities(&self, ticket_id: &str) -> ApiResult<Vec<Activity>> {
        let rows = sqlx::query(
            "SELECT id, ticket_id, organization_id, actor_id, action, metadata, created_at
             FROM ticket_activities
             WHERE ticket_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_activity).collect()
    }
}
