use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{Dimension, PlanLimits};

/// Length of the API-call enforcement window
pub const API_WINDOW_SECONDS: i64 = 60;

/// Per-organization, per-period ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub organization_id: String,
    pub subscription_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub is_current: bool,
    pub tickets_used: i64,
    pub messages_used: i64,
    pub storage_used_mb: i64,
    /// Total for the period, kept for metering
    pub api_calls_used: i64,
    pub api_window_started_at: Option<DateTime<Utc>>,
    /// Calls inside the current one-minute window, used for enforcement
    pub api_window_count: i64,
    pub tickets_remaining: i64,
    pub messages_remaining: i64,
    pub storage_remaining_mb: i64,
    pub api_calls_remaining: i64,
    pub tickets_alert_sent_at: Option<DateTime<Utc>>,
    pub messages_alert_sent_at: Option<DateTime<Utc>>,
    pub storage_alert_sent_at: Option<DateTime<Utc>>,
    pub api_calls_alert_sent_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Zeroed record for a new period. Storage is a standing balance and is
    /// carried over from the previous period.
    pub fn fresh(
        organization_id: String,
        subscription_id: String,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        limits: &PlanLimits,
        carried_storage_mb: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id,
            subscription_id,
            period_start,
            period_end,
            is_current: true,
            tickets_used: 0,
            messages_used: 0,
            storage_used_mb: carried_storage_mb.max(0),
            api_calls_used: 0,
            api_window_started_at: None,
            api_window_count: 0,
            tickets_remaining: limits.initial_remaining(Dimension::Tickets),
            messages_remaining: limits.initial_remaining(Dimension::Messages),
            storage_remaining_mb: limits.initial_remaining(Dimension::Storage),
            api_calls_remaining: limits.initial_remaining(Dimension::ApiCalls),
            tickets_alert_sent_at: None,
            messages_alert_sent_at: None,
            storage_alert_sent_at: None,
            api_calls_alert_sent_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        if !limits.is_unlimited(Dimension::Storage) {
            record.storage_remaining_mb =
                (limits.storage_per_org_mb - record.storage_used_mb).max(0);
        }
        record
    }

    /// Whether the API window is still open at `now`
    pub fn api_window_is_live(&self, now: DateTime<Utc>) -> bool {
        self.api_window_started_at
            .map(|started| now < started + Duration::seconds(API_WINDOW_SECONDS))
            .unwrap_or(false)
    }

    /// Usage the quota decision is made against. For API calls that is the
    /// live one-minute window, not the period total.
    pub fn enforced_usage(&self, dimension: Dimension, now: DateTime<Utc>) -> i64 {
        match dimension {
            Dimension::Tickets => self.tickets_used,
            Dimension::Messages => self.messages_used,
            Dimension::Storage => self.storage_used_mb,
            Dimension::ApiCalls => {
                if self.api_window_is_live(now) {
                    self.api_window_count
                } else {
                    0
                }
            }
        }
    }

    pub fn remaining(&self, dimension: Dimension) -> i64 {
        match dimension {
            Dimension::Tickets => self.tickets_remaining,
            Dimension::Messages => self.messages_remaining,
            Dimension::Storage => self.storage_remaining_mb,
            Dimension::ApiCalls => self.api_calls_remaining,
        }
    }

    pub fn set_remaining(&mut self, dimension: Dimension, value: i64) {
        let slot = match dimension {
            Dimension::Tickets => &mut self.tickets_remaining,
            Dimension::Messages => &mut self.messages_remaining,
            Dimension::Storage => &mut self.storage_remaining_mb,
            Dimension::ApiCalls => &mut self.api_calls_remaining,
        };
        *slot = value;
    }

    pub fn alert_sent_at(&self, dimension: Dimension) -> Option<DateTime<Utc>> {
        match dimension {
            Dimension::Tickets => self.tickets_alert_sent_at,
            Dimension::Messages => self.messages_alert_sent_at,
            Dimension::Storage => self.storage_alert_sent_at,
            Dimension::ApiCalls => self.api_calls_alert_sent_at,
        }
    }

    pub fn mark_alert_sent(&mut self, dimension: Dimension, at: DateTime<Utc>) {
        let slot = match dimension {
            Dimension::Tickets => &mut self.tickets_alert_sent_at,
            Dimension::Messages => &mut self.messages_alert_sent_at,
            Dimension::Storage => &mut self.storage_alert_sent_at,
            Dimension::ApiCalls => &mut self.api_calls_alert_sent_at,
        };
        *slot = Some(at);
    }
}

/// Result of a quota decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaCheck {
    pub dimension: Dimension,
    pub allowed: bool,
    pub current: i64,
    /// `-1` when unlimited
    pub limit: i64,
    pub remaining: i64,
    pub percent_used: i64,
    pub should_alert: bool,
    pub unlimited: bool,
    /// Why the request was denied, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub const UPGRADE_REQUIRED: &str = "upgrade_required";
pub const LIMIT_REACHED: &str = "limit_reached";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementUsage {
    pub amount: i64,
}

/// Outcome of a mid-period plan change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanChange {
    pub organization_id: String,
    pub old_plan_id: String,
    pub new_plan_id: String,
    pub is_upgrade: bool,
    pub usage: UsageRecord,
}
