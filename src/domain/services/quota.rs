//! Quota arithmetic over a usage record and plan limits.
//!
//! Remaining balances are maintained incrementally and floored at zero. The
//! ledger itself is soft: it records overshoot, and denial only happens in
//! [`evaluate`] before an operation runs.

use chrono::{DateTime, Utc};

use crate::domain::entities::{
    Dimension, Plan, PlanLimits, QuotaCheck, UsageRecord, LIMIT_REACHED, UNLIMITED,
    UNLIMITED_REMAINING, UPGRADE_REQUIRED,
};

/// `round(100 * current / limit)`; a zero ceiling reads as fully used.
pub fn percent_used(current: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 100;
    }
    ((current as f64) * 100.0 / (limit as f64)).round() as i64
}

/// Quota decision for one dimension. `plan` is `None` when the organization
/// has no entitled subscription.
pub fn evaluate(
    plan: Option<&Plan>,
    record: Option<&UsageRecord>,
    dimension: Dimension,
    now: DateTime<Utc>,
) -> QuotaCheck {
    let current = record
        .map(|r| r.enforced_usage(dimension, now))
        .unwrap_or(0);

    let Some(plan) = plan else {
        return QuotaCheck {
            dimension,
            allowed: false,
            current,
            limit: 0,
            remaining: 0,
            percent_used: 0,
            should_alert: false,
            unlimited: false,
            reason: Some(UPGRADE_REQUIRED.to_string()),
        };
    };

    let limit = plan.limits.limit_for(dimension);
    if limit == UNLIMITED {
        return QuotaCheck {
            dimension,
            allowed: true,
            current,
            limit: UNLIMITED,
            remaining: UNLIMITED_REMAINING,
            percent_used: 0,
            should_alert: false,
            unlimited: true,
            reason: None,
        };
    }

    let remaining = match record {
        // A stale API window has fully replenished
        Some(r) if dimension == Dimension::ApiCalls && !r.api_window_is_live(now) => {
            plan.limits.initial_remaining(dimension)
        }
        Some(r) => r.remaining(dimension),
        None => plan.limits.initial_remaining(dimension),
    };

    let allowed = current < limit;
    let percent = percent_used(current, limit);
    QuotaCheck {
        dimension,
        allowed,
        current,
        limit,
        remaining,
        percent_used: percent,
        should_alert: plan.alerts_enabled && percent >= plan.alert_threshold_percent,
        unlimited: false,
        reason: if allowed {
            None
        } else {
            Some(LIMIT_REACHED.to_string())
        },
    }
}

/// Apply a positive increment. Remaining never drops below zero; unlimited
/// dimensions stay at the sentinel.
pub fn apply_increment(
    record: &mut UsageRecord,
    limits: &PlanLimits,
    dimension: Dimension,
    amount: i64,
    now: DateTime<Utc>,
) {
    match dimension {
        Dimension::Tickets => record.tickets_used += amount,
        Dimension::Messages => record.messages_used += amount,
        Dimension::Storage => record.storage_used_mb += amount,
        Dimension::ApiCalls => {
            if !record.api_window_is_live(now) {
                record.api_window_started_at = Some(now);
                record.api_window_count = 0;
                record.api_calls_remaining = limits.initial_remaining(Dimension::ApiCalls);
            }
            record.api_window_count += amount;
            record.api_calls_used += amount;
        }
    }

    let remaining = if limits.is_unlimited(dimension) {
        UNLIMITED_REMAINING
    } else {
        (record.remaining(dimension) - amount).max(0)
    };
    record.set_remaining(dimension, remaining);
    record.updated_at = now;
}

/// Redistribute remaining balances after a mid-period plan change.
///
/// Upgrade: each capped dimension gains `max(0, new - old)` on top of what is
/// left. Downgrade: remaining is recomputed as `max(0, new - used)`, so usage
/// already consumed counts fully against the smaller limit. Any unlimited side
/// on an upgrade, or an unlimited new limit on a downgrade, yields the sentinel.
pub fn reconcile_plan_change(
    record: &mut UsageRecord,
    old: &PlanLimits,
    new: &PlanLimits,
    is_upgrade: bool,
    now: DateTime<Utc>,
) {
    for dimension in Dimension::ALL {
        let old_limit = old.limit_for(dimension);
        let new_limit = new.limit_for(dimension);

        let remaining = if is_upgrade {
            if old_limit == UNLIMITED || new_limit == UNLIMITED {
                UNLIMITED_REMAINING
            } else {
                record.remaining(dimension) + (new_limit - old_limit).max(0)
            }
        } else if new_limit == UNLIMITED {
            UNLIMITED_REMAINING
        } else {
            (new_limit - record.enforced_usage(dimension, now)).max(0)
        };
        record.set_remaining(dimension, remaining);
    }
    record.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::PlanFeatures;

    fn limits(tickets: i64) -> PlanLimits {
        PlanLimits {
            tickets_per_month: tickets,
            messages_per_month: 500,
            storage_per_org_mb: 100,
            api_requests_per_minute: 30,
            agents_per_org: 2,
            customers_per_org: 100,
        }
    }

    fn plan(tickets: i64) -> Plan {
        Plan {
            id: "free".into(),
            name: "Free".into(),
            price_cents: 0,
            limits: limits(tickets),
            features: PlanFeatures::default(),
            alerts_enabled: true,
            alert_threshold_percent: 80,
            is_active: true,
            is_default: true,
        }
    }

    fn record_with(limits: &PlanLimits, tickets_used: i64, now: DateTime<Utc>) -> UsageRecord {
        let mut record = UsageRecord::fresh(
            "org".into(),
            "sub".into(),
            now,
            now + chrono::Duration::days(30),
            limits,
            0,
            now,
        );
        if tickets_used > 0 {
            apply_increment(&mut record, limits, Dimension::Tickets, tickets_used, now);
        }
        record
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent_used(48, 50), 96);
        assert_eq!(percent_used(1, 3), 33);
        assert_eq!(percent_used(2, 3), 67);
        assert_eq!(percent_used(5, 0), 100);
    }

    #[test]
    fn test_free_plan_near_limit() {
        let now = Utc::now();
        let plan = plan(50);
        let mut record = record_with(&plan.limits, 48, now);

        let check = evaluate(Some(&plan), Some(&record), Dimension::Tickets, now);
        assert!(check.allowed);
        assert_eq!(check.current, 48);
        assert_eq!(check.remaining, 2);
        assert_eq!(check.percent_used, 96);
        assert!(check.should_alert);

        apply_increment(&mut record, &plan.limits, Dimension::Tickets, 3, now);
        assert_eq!(record.tickets_used, 51);
        assert_eq!(record.tickets_remaining, 0);

        let check = evaluate(Some(&plan), Some(&record), Dimension::Tickets, now);
        assert!(!check.allowed);
        assert_eq!(check.reason.as_deref(), Some(LIMIT_REACHED));
    }

    #[test]
    fn test_unlimited_always_allows() {
        let now = Utc::now();
        let plan = plan(UNLIMITED);
        let record = record_with(&plan.limits, 10_000, now);
        let check = evaluate(Some(&plan), Some(&record), Dimension::Tickets, now);
        assert!(check.allowed);
        assert_eq!(check.percent_used, 0);
        assert!(!check.should_alert);
        assert_eq!(check.remaining, UNLIMITED_REMAINING);
        assert_eq!(record.tickets_remaining, UNLIMITED_REMAINING);
    }

    #[test]
    fn test_no_plan_denies_with_upgrade_required() {
        let check = evaluate(None, None, Dimension::Messages, Utc::now());
        assert!(!check.allowed);
        assert_eq!(check.reason.as_deref(), Some(UPGRADE_REQUIRED));
    }

    #[test]
    fn test_alerts_disabled_never_alert() {
        let now = Utc::now();
        let mut plan = plan(50);
        plan.alerts_enabled = false;
        let record = record_with(&plan.limits, 49, now);
        assert!(!evaluate(Some(&plan), Some(&record), Dimension::Tickets, now).should_alert);
    }

    #[test]
    fn test_api_window_resets_after_a_minute() {
        let now = Utc::now();
        let plan = plan(50);
        let mut record = record_with(&plan.limits, 0, now);

        apply_increment(&mut record, &plan.limits, Dimension::ApiCalls, 30, now);
        let check = evaluate(Some(&plan), Some(&record), Dimension::ApiCalls, now);
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0);

        let later = now + chrono::Duration::seconds(61);
        let check = evaluate(Some(&plan), Some(&record), Dimension::ApiCalls, later);
        assert!(check.allowed);
        assert_eq!(check.current, 0);
        assert_eq!(check.remaining, 30);

        apply_increment(&mut record, &plan.limits, Dimension::ApiCalls, 1, later);
        assert_eq!(record.api_window_count, 1);
        assert_eq!(record.api_calls_used, 31);
        assert_eq!(record.api_calls_remaining, 29);
    }

    #[test]
    fn test_upgrade_adds_delta_and_never_decreases() {
        let now = Utc::now();
        let old = limits(50);
        let new = limits(100);
        let mut record = record_with(&old, 60, now);
        assert_eq!(record.tickets_remaining, 0);

        reconcile_plan_change(&mut record, &old, &new, true, now);
        assert_eq!(record.tickets_remaining, 50);
        // Dimensions with an unchanged limit keep their balance
        assert_eq!(record.messages_remaining, 500);
    }

    #[test]
    fn test_upgrade_with_smaller_limit_keeps_balance() {
        let now = Utc::now();
        let old = limits(100);
        let new = limits(80);
        let mut record = record_with(&old, 10, now);
        reconcile_plan_change(&mut record, &old, &new, true, now);
        assert_eq!(record.tickets_remaining, 90);
    }

    #[test]
    fn test_upgrade_to_unlimited_uses_sentinel() {
        let now = Utc::now();
        let old = limits(50);
        let new = limits(UNLIMITED);
        let mut record = record_with(&old, 10, now);
        reconcile_plan_change(&mut record, &old, &new, true, now);
        assert_eq!(record.tickets_remaining, UNLIMITED_REMAINING);
    }

    #[test]
    fn test_downgrade_recomputes_from_usage() {
        let now = Utc::now();
        let old = limits(100);
        let new = limits(50);

        let mut record = record_with(&old, 47, now);
        reconcile_plan_change(&mut record, &old, &new, false, now);
        assert_eq!(record.tickets_remaining, 3);

        let mut record = record_with(&old, 60, now);
        reconcile_plan_change(&mut record, &old, &new, false, now);
        assert_eq!(record.tickets_remaining, 0);
    }
}
