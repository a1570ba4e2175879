//! Subscription Records
//!
//! Local view of subscriptions activated through hosted checkout, kept up
//! to date from webhooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{BillingError, Result};

/// A subscription record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Stripe subscription ID
    pub subscription_id: String,

    /// Stripe customer ID
    pub customer_id: Option<String>,

    /// End-user id passed as the checkout client reference
    pub user_id: Option<String>,

    pub plan_key: String,

    /// Provider status (active, trialing, past_due, canceled, ...)
    pub status: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn new(subscription_id: impl Into<String>, plan_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: subscription_id.into(),
            customer_id: None,
            user_id: None,
            plan_key: plan_key.into(),
            status: "active".into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the subscription currently grants access
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.updated_at = Utc::now();
    }
}

/// Subscription storage trait
pub trait SubscriptionStore: Send + Sync {
    /// Save or update a record
    fn save(&self, record: &SubscriptionRecord) -> Result<()>;

    /// Get record by subscription ID
    fn get(&self, subscription_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Most recently updated record for a user
    fn get_by_user(&self, user_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Most recently updated record for a Stripe customer
    fn get_by_customer(&self, customer_id: &str) -> Result<Option<SubscriptionRecord>>;
}

/// In-memory subscription store (for development)
#[derive(Default)]
pub struct MemorySubscriptionStore {
    records: RwLock<HashMap<String, SubscriptionRecord>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> BillingError {
    BillingError::Storage("subscription store lock poisoned".into())
}

impl SubscriptionStore for MemorySubscriptionStore {
    fn save(&self, record: &SubscriptionRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(record.subscription_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, subscription_id: &str) -> Result<Option<SubscriptionRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(subscription_id).cloned())
    }

    fn get_by_user(&self, user_id: &str) -> Result<Option<SubscriptionRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    fn get_by_customer(&self, customer_id: &str) -> Result<Option<SubscriptionRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .values()
            .filter(|r| r.customer_id.as_deref() == Some(customer_id))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_drives_activity() {
        let mut record = SubscriptionRecord::new("sub_123", "essential");
        assert!(record.is_active());

        record.set_status("past_due");
        assert!(!record.is_active());

        record.set_status("trialing");
        assert!(record.is_active());
    }

    #[test]
    fn test_lookup_by_user() {
        let store = MemorySubscriptionStore::new();
        let mut record = SubscriptionRecord::new("sub_1", "professional");
        record.user_id = Some("user_42".into());
        store.save(&record).unwrap();
        store.save(&SubscriptionRecord::new("sub_2", "essential")).unwrap();

        let found = store.get_by_user("user_42").unwrap().unwrap();
        assert_eq!(found.subscription_id, "sub_1");
        assert!(store.get_by_user("nobody").unwrap().is_none());
    }

    #[test]
    fn test_lookup_by_customer() {
        let store = MemorySubscriptionStore::new();
        let mut record = SubscriptionRecord::new("sub_1", "enterprise");
        record.customer_id = Some("cus_1".into());
        store.save(&record).unwrap();

        assert_eq!(store.get_by_customer("cus_1").unwrap().unwrap().plan_key, "enterprise");
        assert!(store.get_by_customer("cus_2").unwrap().is_none());
    }
}
