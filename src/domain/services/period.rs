//! Billing-period and deadline arithmetic. Pure functions of their inputs.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// Half-open interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// One calendar month later, clamped to the last day of a shorter month
/// (Jan 31 -> Feb 28/29).
pub fn add_one_month(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .checked_add_months(Months::new(1))
        .unwrap_or_else(|| instant + Duration::days(30))
}

/// Period starting at `start` and lasting one calendar month
pub fn billing_period_from(start: DateTime<Utc>) -> BillingPeriod {
    BillingPeriod {
        start,
        end: add_one_month(start),
    }
}

pub fn deadline_after(start: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    start + Duration::minutes(minutes)
}
