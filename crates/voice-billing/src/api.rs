//! Billing API abstraction
//!
//! The object model the reconciler and checkout builder work against.
//! [`StripeBillingApi`](crate::StripeBillingApi) talks to Stripe,
//! [`MemoryBillingApi`](crate::MemoryBillingApi) keeps everything in memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::catalog::{BillingInterval, INTERVAL_COUNT};
use crate::error::Result;

/// String key/value metadata attached to remote objects
pub type Metadata = HashMap<String, String>;

/// Meter event payload field carrying the minutes used
pub const METER_VALUE_KEY: &str = "minutes";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterStatus {
    #[default]
    Active,
    /// Deactivated; still holds its event name
    Inactive,
}

/// Usage meter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub id: String,
    pub display_name: String,
    pub event_name: String,
    #[serde(default)]
    pub status: MeterStatus,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Meter {
    pub fn is_active(&self) -> bool {
        self.status == MeterStatus::Active
    }
}

/// Product
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// How a recurring price is charged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageType {
    /// Fixed quantity per period
    #[default]
    Licensed,
    /// Charged from meter-reported usage
    Metered,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::Licensed => "licensed",
            UsageType::Metered => "metered",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurring {
    pub interval: BillingInterval,
    /// Intervals between charges (3 × month = quarterly)
    #[serde(default = "default_interval_count")]
    pub interval_count: u32,
    #[serde(default)]
    pub usage_type: UsageType,
    #[serde(default)]
    pub meter: Option<String>,
}

const fn default_interval_count() -> u32 {
    INTERVAL_COUNT
}

/// Price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub product: String,
    pub currency: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub recurring: Option<Recurring>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Price {
    pub fn usage_type(&self) -> Option<UsageType> {
        self.recurring.as_ref().map(|r| r.usage_type)
    }

    pub fn meter(&self) -> Option<&str> {
        self.recurring.as_ref().and_then(|r| r.meter.as_deref())
    }
}

/// Parameters for creating a meter
#[derive(Clone, Debug)]
pub struct NewMeter {
    pub display_name: String,
    pub event_name: String,
    /// Payload field carrying the usage quantity
    pub value_key: String,
    pub metadata: Metadata,
}

/// Parameters for creating a product
#[derive(Clone, Debug)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub metadata: Metadata,
}

/// Parameters for creating a recurring price
#[derive(Clone, Debug)]
pub struct NewPrice {
    pub product: String,
    pub currency: String,
    pub unit_amount: i64,
    pub interval: BillingInterval,
    pub usage_type: UsageType,
    /// Meter backing a metered price
    pub meter: Option<String>,
    pub metadata: Metadata,
}

/// One checkout line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineItem {
    pub price: String,
    pub quantity: u64,
    /// Usage type of `price`
    pub usage_type: UsageType,
}

impl LineItem {
    /// Quantity as sent to the provider. Metered lines carry none; usage
    /// comes from meter events.
    pub fn wire_quantity(&self) -> Option<u64> {
        (self.usage_type == UsageType::Licensed).then_some(self.quantity)
    }
}

/// Parameters for creating a subscription-mode checkout session
#[derive(Clone, Debug)]
pub struct NewCheckoutSession {
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub client_reference_id: Option<String>,
    pub customer: Option<String>,
    /// Attached to the session
    pub metadata: Metadata,
    /// Attached to the resulting subscription
    pub subscription_metadata: Metadata,
}

/// Checkout session handle returned by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRef {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Usage event reported against a meter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeterEvent {
    pub event_name: String,
    pub customer: String,
    pub value: u64,
}

/// Remote billing provider (Strategy pattern)
///
/// Every call is a single request/response round trip; implementations do
/// not retry.
#[async_trait]
pub trait BillingApi: Send + Sync {
    /// All meters, including deactivated ones
    async fn list_meters(&self) -> Result<Vec<Meter>>;

    async fn create_meter(&self, params: &NewMeter) -> Result<Meter>;

    async fn reactivate_meter(&self, meter_id: &str) -> Result<Meter>;

    async fn list_products(&self) -> Result<Vec<Product>>;

    async fn create_product(&self, params: &NewProduct) -> Result<Product>;

    /// Merge `metadata` into an existing product's metadata
    async fn update_product_metadata(&self, product_id: &str, metadata: &Metadata) -> Result<Product>;

    /// Active prices belonging to a product
    async fn list_prices(&self, product_id: &str) -> Result<Vec<Price>>;

    async fn create_price(&self, params: &NewPrice) -> Result<Price>;

    async fn create_checkout_session(&self, params: &NewCheckoutSession) -> Result<CheckoutSessionRef>;

    async fn create_meter_event(&self, event: &MeterEvent) -> Result<()>;

    /// Provider name
    fn name(&self) -> &str;
}

/// Build a metadata map from string pairs
pub fn metadata<I, K, V>(pairs: I) -> Metadata
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
