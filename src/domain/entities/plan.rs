use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;
use crate::domain::ports::plan_repository::PlanRepository;
use crate::infrastructure::http::middleware::error::ApiResult;

/// Limit value meaning "no ceiling"
pub const UNLIMITED: i64 = -1;

/// Stand-in for an unlimited remaining balance. Large but finite so it
/// survives integer columns and JSON clients.
pub const UNLIMITED_REMAINING: i64 = 999_999_999;

/// One of the four metered resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Tickets,
    Messages,
    Storage,
    ApiCalls,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Tickets,
        Dimension::Messages,
        Dimension::Storage,
        Dimension::ApiCalls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Tickets => "tickets",
            Dimension::Messages => "messages",
            Dimension::Storage => "storage",
            Dimension::ApiCalls => "api_calls",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tickets" => Ok(Dimension::Tickets),
            "messages" => Ok(Dimension::Messages),
            "storage" => Ok(Dimension::Storage),
            "api_calls" | "api" => Ok(Dimension::ApiCalls),
            other => Err(DomainError::ValidationError(format!(
                "Unknown usage dimension '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub tickets_per_month: i64,
    pub messages_per_month: i64,
    pub storage_per_org_mb: i64,
    pub api_requests_per_minute: i64,
    pub agents_per_org: i64,
    pub customers_per_org: i64,
}

impl PlanLimits {
    pub fn limit_for(&self, dimension: Dimension) -> i64 {
        match dimension {
            Dimension::Tickets => self.tickets_per_month,
            Dimension::Messages => self.messages_per_month,
            Dimension::Storage => self.storage_per_org_mb,
            Dimension::ApiCalls => self.api_requests_per_minute,
        }
    }

    pub fn is_unlimited(&self, dimension: Dimension) -> bool {
        self.limit_for(dimension) == UNLIMITED
    }

    /// Starting balance for a fresh period
    pub fn initial_remaining(&self, dimension: Dimension) -> i64 {
        if self.is_unlimited(dimension) {
            UNLIMITED_REMAINING
        } else {
            self.limit_for(dimension).max(0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeatures {
    #[serde(default)]
    pub sla_policies: bool,
    #[serde(default)]
    pub custom_categories: bool,
    #[serde(default)]
    pub merge_tickets: bool,
    #[serde(default)]
    pub priority_support: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Monthly price in cents. The only signal for upgrade vs downgrade.
    pub price_cents: i64,
    pub limits: PlanLimits,
    pub features: PlanFeatures,
    pub alerts_enabled: bool,
    pub alert_threshold_percent: i64,
    pub is_active: bool,
    pub is_default: bool,
}

impl Plan {
    pub fn is_upgrade_from(&self, current: &Plan) -> bool {
        self.price_cents > current.price_cents
    }
}

/// Immutable plan table, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    plans: BTreeMap<String, Plan>,
}

impl PlanCatalog {
    pub fn from_plans(plans: Vec<Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Read the plan table once. The catalog never changes afterwards.
    pub async fn load(repository: &dyn PlanRepository) -> ApiResult<Self> {
        let plans = repository.list_plans().await?;
        tracing::info!("Loaded {} plans into the catalog", plans.len());
        Ok(Self::from_plans(plans))
    }

    pub fn get(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    /// Active plan lookup; retired plans stay resolvable through [`get`](Self::get)
    /// for organizations still bound to them.
    pub fn get_active(&self, plan_id: &str) -> Option<&Plan> {
        self.get(plan_id).filter(|p| p.is_active)
    }

    pub fn default_plan(&self) -> Option<&Plan> {
        self.plans.values().find(|p| p.is_default && p.is_active)
    }

    pub fn active_plans(&self) -> Vec<&Plan> {
        let mut plans: Vec<&Plan> = self.plans.values().filter(|p| p.is_active).collect();
        plans.sort_by_key(|p| p.price_cents);
        plans
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}
