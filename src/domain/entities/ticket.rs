use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Pending => "pending",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    /// Open and pending tickets are still waiting on the support team.
    pub fn is_active(&self) -> bool {
        matches!(self, TicketStatus::Open | TicketStatus::Pending)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "pending" => Ok(TicketStatus::Pending),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(DomainError::ValidationError(format!(
                "Unknown ticket status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(DomainError::ValidationError(format!(
                "Unknown priority '{}'",
                other
            ))),
        }
    }
}

/// Where the ticket came in from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Web,
    Email,
    Chat,
    Phone,
    Api,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::Email => "email",
            Channel::Chat => "chat",
            Channel::Phone => "phone",
            Channel::Api => "api",
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Web
    }
}

impl FromStr for Channel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Channel::Web),
            "email" => Ok(Channel::Email),
            "chat" => Ok(Channel::Chat),
            "phone" => Ok(Channel::Phone),
            "api" => Ok(Channel::Api),
            other => Err(DomainError::ValidationError(format!(
                "Unknown channel '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub organization_id: String,
    /// Sequential per organization, starting at 1
    pub number: i64,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub channel: Channel,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub customer_id: String,
    pub assignee_id: Option<String>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub sla_breached: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Set when this ticket was closed by merging it into another one
    pub merged_into_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Build a new open ticket. The number is allocated by the repository on insert.
    pub fn new(
        organization_id: String,
        customer_id: String,
        request: &CreateTicket,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id,
            number: 0,
            title: request.title.trim().to_string(),
            description: request.description.clone(),
            status: TicketStatus::Open,
            priority: request.priority.unwrap_or_default(),
            channel: request.channel.unwrap_or_default(),
            tags: normalize_tags(&request.tags),
            category: request.category.clone(),
            customer_id,
            assignee_id: None,
            sla_deadline: None,
            first_response_at: None,
            sla_breached: false,
            resolved_at: None,
            closed_at: None,
            merged_into_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trim, lowercase and dedupe tags; output is sorted.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTicket {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<Priority>,
    pub channel: Option<Channel>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: Option<String>,
    /// Agents may open tickets on behalf of a customer
    pub customer_id: Option<String>,
}

impl CreateTicket {
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Ticket title must not be empty".to_string());
        }
        if self.title.chars().count() > 200 {
            return Err("Ticket title must be at most 200 characters".to_string());
        }
        Ok(())
    }
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTicket {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl UpdateTicket {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.tags.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    pub assignee_id: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMetadata {
    pub page: i64,
    pub per_page: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketListResponse {
    pub tickets: Vec<Ticket>,
    pub pagination: PaginationMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketMessage {
    pub id: String,
    pub ticket_id: String,
    pub author_id: String,
    pub body: String,
    pub is_internal: bool,
    /// Original message id when copied over by a merge
    pub copied_from_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TicketMessage {
    pub fn new(
        ticket_id: String,
        author_id: String,
        body: String,
        is_internal: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id,
            author_id,
            body,
            is_internal,
            copied_from_id: None,
            created_at: now,
        }
    }

    /// Copy into another ticket, keeping the original author and timestamp.
    pub fn copy_to(&self, ticket_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: ticket_id.to_string(),
            author_id: self.author_id.clone(),
            body: self.body.clone(),
            is_internal: self.is_internal,
            copied_from_id: Some(self.id.clone()),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMessage {
    pub body: String,
    #[serde(default)]
    pub is_internal: bool,
}

/// Most ids a single bulk or merge request may name
pub const MAX_BULK_IDS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkUpdate {
    pub ticket_ids: Vec<String>,
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkAssign {
    pub ticket_ids: Vec<String>,
    /// `None` unassigns
    pub assignee_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDelete {
    pub ticket_ids: Vec<String>,
    /// Must be set; there is no soft delete
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeTickets {
    pub secondary_ticket_ids: Vec<String>,
    #[serde(default)]
    pub merge_comments: bool,
}

/// Partial result of a batch operation. One member failing never aborts the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResult {
    pub success_count: usize,
    pub failure_count: usize,
    /// Ticket id to error message
    pub errors: BTreeMap<String, String>,
}

impl BulkResult {
    pub fn record<T, E: fmt::Display>(&mut self, ticket_id: &str, outcome: Result<T, E>) {
        match outcome {
            Ok(_) => self.success_count += 1,
            Err(err) => {
                self.failure_count += 1;
                self.errors.insert(ticket_id.to_string(), err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            " Billing ".to_string(),
            "billing".to_string(),
            "".to_string(),
            "Refund".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["billing", "refund"]);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::Low < Priority::Medium);
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            TicketStatus::Open,
            TicketStatus::Pending,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
        }
        assert!("snoozed".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_create_ticket_validation() {
        let mut request = CreateTicket {
            title: "   ".to_string(),
            ..Default::default()
        };
        assert!(request.validate().is_err());
        request.title = "Printer on fire".to_string();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_message_copy_preserves_author_and_time() {
        let now = Utc::now();
        let original = TicketMessage::new("b".into(), "cust-1".into(), "hi".into(), false, now);
        let copy = original.copy_to("a");
        assert_eq!(copy.ticket_id, "a");
        assert_eq!(copy.author_id, "cust-1");
        assert_eq!(copy.created_at, now);
        assert_eq!(copy.copied_from_id.as_deref(), Some(original.id.as_str()));
        assert_ne!(copy.id, original.id);
    }

    #[test]
    fn test_bulk_result_accumulates_independently() {
        let mut result = BulkResult::default();
        result.record::<(), String>("a", Ok(()));
        result.record::<(), String>("b", Err("Ticket not found".to_string()));
        result.record::<(), String>("c", Ok(()));
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.errors.get("b").map(String::as_str), Some("Ticket not found"));
    }
}
