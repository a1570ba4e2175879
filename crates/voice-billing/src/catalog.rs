//! Plan Catalog
//!
//! The fixed set of subscription tiers and their commercial terms.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{BillingError, Result};

/// All plans are billed in US dollars
pub const CURRENCY: &str = "usd";

/// Every plan bills once per interval
pub const INTERVAL_COUNT: u32 = 1;

/// Billing interval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Day,
    Week,
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Day => "day",
            BillingInterval::Week => "week",
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }
}

/// A subscription tier
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Unique plan key (e.g. "essential")
    pub key: String,

    /// Display name
    pub name: String,

    /// Base price in cents
    pub price_cents: i64,

    pub interval: BillingInterval,

    /// Voice minutes included in the base price
    pub included_minutes: u64,

    /// Charge per minute beyond the included usage, in cents.
    /// Plans without an overage rate get no meter and no metered price.
    pub overage_rate_cents: Option<i64>,

    /// Feature bullets, in display order
    pub features: Vec<String>,

    /// Highlighted on the pricing page
    pub popular: bool,
}

impl PlanDefinition {
    /// Display name of the usage meter backing this plan's overage
    pub fn meter_display_name(&self) -> String {
        format!("{} Voice Minutes", self.name)
    }

    /// Event name usage is reported under
    pub fn meter_event_name(&self) -> String {
        format!("voice_minutes_{}", self.key)
    }

    /// Name of the remote product for this plan
    pub fn product_name(&self) -> String {
        format!("Voice AI {}", self.name)
    }

    pub fn has_overage(&self) -> bool {
        self.overage_rate_cents.is_some()
    }
}

/// Immutable, ordered plan table
#[derive(Clone, Debug)]
pub struct PlanCatalog {
    plans: Vec<PlanDefinition>,
}

impl PlanCatalog {
    /// Build a catalog, rejecting duplicate keys and names.
    ///
    /// Remote objects are matched by derived name, so two plans sharing a
    /// name would reconcile onto the same product.
    pub fn new(plans: Vec<PlanDefinition>) -> Result<Self> {
        let mut keys = HashSet::new();
        let mut names = HashSet::new();
        for plan in &plans {
            if !keys.insert(plan.key.as_str()) {
                return Err(BillingError::Config(format!("duplicate plan key '{}'", plan.key)));
            }
            if !names.insert(plan.name.as_str()) {
                return Err(BillingError::Config(format!("duplicate plan name '{}'", plan.name)));
            }
        }
        Ok(Self { plans })
    }

    /// Look up a plan by key
    pub fn get(&self, key: &str) -> Result<&PlanDefinition> {
        self.plans
            .iter()
            .find(|plan| plan.key == key)
            .ok_or_else(|| BillingError::UnknownPlan(key.to_string()))
    }

    /// Plans in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &PlanDefinition> {
        self.plans.iter()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        let plan = |key: &str, name: &str, price_cents, included_minutes, overage, popular, features: &[&str]| {
            PlanDefinition {
                key: key.into(),
                name: name.into(),
                price_cents,
                interval: BillingInterval::Month,
                included_minutes,
                overage_rate_cents: Some(overage),
                features: features.iter().map(|f| (*f).to_string()).collect(),
                popular,
            }
        };

        Self {
            plans: vec![
                plan("essential", "Essential", 9900, 1_000, 10, false, &[
                    "1,000 voice minutes / month",
                    "1 AI voice agent",
                    "Call recordings & transcripts",
                    "Email support",
                ]),
                plan("professional", "Professional", 29900, 5_000, 8, true, &[
                    "5,000 voice minutes / month",
                    "5 AI voice agents",
                    "CRM & calendar integrations",
                    "Custom voices",
                    "Priority support",
                ]),
                plan("enterprise", "Enterprise", 99900, 20_000, 6, false, &[
                    "20,000 voice minutes / month",
                    "Unlimited AI voice agents",
                    "Dedicated phone numbers",
                    "SSO & audit logs",
                    "Dedicated success manager",
                ]),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_lookup() {
        let catalog = PlanCatalog::default();
        let essential = catalog.get("essential").unwrap();
        assert_eq!(essential.price_cents, 9900);
        assert_eq!(essential.overage_rate_cents, Some(10));
        assert_eq!(essential.interval, BillingInterval::Month);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_unknown_plan() {
        let catalog = PlanCatalog::default();
        assert!(matches!(catalog.get("platinum"), Err(BillingError::UnknownPlan(key)) if key == "platinum"));
    }

    #[test]
    fn test_catalog_order_preserved() {
        let keys: Vec<_> = PlanCatalog::default().iter().map(|p| p.key.clone()).collect();
        assert_eq!(keys, ["essential", "professional", "enterprise"]);
    }

    #[test]
    fn test_derived_names() {
        let catalog = PlanCatalog::default();
        let plan = catalog.get("professional").unwrap();
        assert_eq!(plan.meter_display_name(), "Professional Voice Minutes");
        assert_eq!(plan.meter_event_name(), "voice_minutes_professional");
        assert_eq!(plan.product_name(), "Voice AI Professional");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut plans: Vec<_> = PlanCatalog::default().iter().cloned().collect();
        plans[1].name = plans[0].name.clone();
        assert!(matches!(PlanCatalog::new(plans), Err(BillingError::Config(_))));
    }
}
