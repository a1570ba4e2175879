//! Provisioning Reconciler
//!
//! Makes the remote billing objects match the [`PlanCatalog`]. Each plan gets
//! exactly one meter, product, base price and metered overage price; objects
//! that already exist are found by name/amount/shape and reused.
//!
//! ```text
//!  catalog order ──▶ essential ──▶ professional ──▶ enterprise
//!                      │
//!                      ├─ meter          (by display or event name, reactivated)
//!                      ├─ product        (by name, patch meter_id)
//!                      ├─ base price     (amount + interval, licensed)
//!                      └─ metered price  (amount + interval + meter)
//! ```
//!
//! Calls are strictly sequential. Two concurrent runs can race between the
//! search and the create, so this runs once at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

use crate::api::{
    BillingApi, METER_VALUE_KEY, Metadata, NewMeter, NewPrice, NewProduct, Price, UsageType, metadata,
};
use crate::catalog::{CURRENCY, INTERVAL_COUNT, PlanCatalog, PlanDefinition};
use crate::error::{BillingError, Result};

/// Remote identifiers for one plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBillingRefs {
    /// Absent for plans without an overage rate
    pub meter_id: Option<String>,
    pub product_id: String,
    pub base_price_id: String,
    /// Absent for plans without an overage rate
    pub metered_price_id: Option<String>,
}

/// Plan key → remote ids, produced by [`reconcile`]
#[derive(Clone, Debug, Default)]
pub struct ProvisionedPlans {
    refs: HashMap<String, RemoteBillingRefs>,
}

impl ProvisionedPlans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plan_key: impl Into<String>, refs: RemoteBillingRefs) {
        self.refs.insert(plan_key.into(), refs);
    }

    pub fn get(&self, plan_key: &str) -> Option<&RemoteBillingRefs> {
        self.refs.get(plan_key)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Whether [`find_or_create`] reused or created its object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciled<T> {
    Existing(T),
    Created(T),
}

impl<T> Reconciled<T> {
    pub fn into_inner(self) -> T {
        match self {
            Reconciled::Existing(item) | Reconciled::Created(item) => item,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Reconciled::Existing(item) | Reconciled::Created(item) => item,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Reconciled::Created(_))
    }
}

/// Return the first item matching `predicate`, or build a new one.
///
/// `create` is only invoked when nothing matches.
pub async fn find_or_create<T, P, C, F>(collection: Vec<T>, predicate: P, create: C) -> Result<Reconciled<T>>
where
    P: Fn(&T) -> bool,
    C: FnOnce() -> F,
    F: Future<Output = Result<T>>,
{
    if let Some(found) = collection.into_iter().find(|item| predicate(item)) {
        return Ok(Reconciled::Existing(found));
    }
    create().await.map(Reconciled::Created)
}

/// Provision every plan in catalog order.
///
/// Fails fast: the first failing call aborts with
/// [`BillingError::Provisioning`]. Plans handled before the failure keep
/// whatever was created for them.
pub async fn reconcile(catalog: &PlanCatalog, api: &dyn BillingApi) -> Result<ProvisionedPlans> {
    tracing::info!(provider = api.name(), plans = catalog.len(), "Reconciling billing catalog");

    let mut provisioned = ProvisionedPlans::new();
    for plan in catalog.iter() {
        let refs = reconcile_plan(plan, api).await?;
        tracing::info!(
            plan = %plan.key,
            product_id = %refs.product_id,
            base_price_id = %refs.base_price_id,
            meter_id = ?refs.meter_id,
            metered_price_id = ?refs.metered_price_id,
            "Plan provisioned"
        );
        provisioned.insert(plan.key.clone(), refs);
    }

    Ok(provisioned)
}

async fn reconcile_plan(plan: &PlanDefinition, api: &dyn BillingApi) -> Result<RemoteBillingRefs> {
    let key = plan.key.as_str();

    // 1. Meter
    let meter_id = match plan.overage_rate_cents {
        Some(rate) => {
            let display_name = plan.meter_display_name();
            let meters = api
                .list_meters()
                .await
                .map_err(BillingError::provisioning(key, "listing meters"))?;
            let params = NewMeter {
                display_name: display_name.clone(),
                event_name: plan.meter_event_name(),
                value_key: METER_VALUE_KEY.into(),
                metadata: metadata([("plan_key", key.to_string()), ("overage_rate_cents", rate.to_string())]),
            };
            // Event names stay reserved by deactivated meters, so match on either name
            let meter = find_or_create(
                meters,
                |m| m.display_name == display_name || m.event_name == params.event_name,
                || api.create_meter(&params),
            )
            .await
            .map_err(BillingError::provisioning(key, "creating meter"))?;
            trace_outcome(key, "meter", &meter.get().id, meter.was_created());

            let mut meter = meter.into_inner();
            if !meter.is_active() {
                tracing::info!(plan = key, meter_id = %meter.id, "Reactivating meter");
                meter = api
                    .reactivate_meter(&meter.id)
                    .await
                    .map_err(BillingError::provisioning(key, "reactivating meter"))?;
            }
            Some(meter.id)
        }
        None => None,
    };

    // 2. Product
    let product_name = plan.product_name();
    let products = api
        .list_products()
        .await
        .map_err(BillingError::provisioning(key, "listing products"))?;
    let params = NewProduct {
        name: product_name.clone(),
        description: Some(format!(
            "{} plan: {} voice minutes included per {}",
            plan.name,
            plan.included_minutes,
            plan.interval.as_str()
        )),
        metadata: product_metadata(plan, meter_id.as_deref()),
    };
    let product = find_or_create(products, |p| p.name == product_name, || api.create_product(&params))
        .await
        .map_err(BillingError::provisioning(key, "creating product"))?;
    trace_outcome(key, "product", &product.get().id, product.was_created());

    let mut product = product.into_inner();
    if let Some(ref meter_id) = meter_id {
        if product.metadata.get("meter_id") != Some(meter_id) {
            tracing::info!(plan = key, product_id = %product.id, meter_id = %meter_id, "Patching product meter reference");
            product = api
                .update_product_metadata(&product.id, &metadata([("meter_id", meter_id.as_str())]))
                .await
                .map_err(BillingError::provisioning(key, "updating product metadata"))?;
        }
    }

    let prices = api
        .list_prices(&product.id)
        .await
        .map_err(BillingError::provisioning(key, "listing prices"))?;

    // 3. Base price
    let params = NewPrice {
        product: product.id.clone(),
        currency: CURRENCY.into(),
        unit_amount: plan.price_cents,
        interval: plan.interval,
        usage_type: UsageType::Licensed,
        meter: None,
        metadata: metadata([("plan_key", key), ("kind", "base")]),
    };
    let base_price = find_or_create(prices.clone(), |p| is_base_price(p, plan), || api.create_price(&params))
        .await
        .map_err(BillingError::provisioning(key, "creating base price"))?;
    trace_outcome(key, "base_price", &base_price.get().id, base_price.was_created());

    // 4. Metered overage price
    let metered_price_id = match (plan.overage_rate_cents, meter_id.as_deref()) {
        (Some(rate), Some(meter)) => {
            let params = NewPrice {
                product: product.id.clone(),
                currency: CURRENCY.into(),
                unit_amount: rate,
                interval: plan.interval,
                usage_type: UsageType::Metered,
                meter: Some(meter.to_string()),
                metadata: metadata([("plan_key", key), ("kind", "overage")]),
            };
            let price = find_or_create(prices, |p| is_metered_price(p, plan, rate, meter), || api.create_price(&params))
                .await
                .map_err(BillingError::provisioning(key, "creating metered price"))?;
            trace_outcome(key, "metered_price", &price.get().id, price.was_created());
            Some(price.into_inner().id)
        }
        _ => None,
    };

    Ok(RemoteBillingRefs {
        meter_id,
        product_id: product.id,
        base_price_id: base_price.into_inner().id,
        metered_price_id,
    })
}

fn product_metadata(plan: &PlanDefinition, meter_id: Option<&str>) -> Metadata {
    let mut metadata = metadata([
        ("plan_key", plan.key.clone()),
        ("included_minutes", plan.included_minutes.to_string()),
    ]);
    if let Some(rate) = plan.overage_rate_cents {
        metadata.insert("overage_rate_cents".into(), rate.to_string());
    }
    if let Some(meter_id) = meter_id {
        metadata.insert("meter_id".into(), meter_id.to_string());
    }
    metadata
}

fn bills_every(price: &Price, plan: &PlanDefinition, usage_type: UsageType) -> bool {
    price.recurring.as_ref().is_some_and(|r| {
        r.interval == plan.interval && r.interval_count == INTERVAL_COUNT && r.usage_type == usage_type
    })
}

fn is_base_price(price: &Price, plan: &PlanDefinition) -> bool {
    price.currency == CURRENCY
        && price.unit_amount == Some(plan.price_cents)
        && bills_every(price, plan, UsageType::Licensed)
}

fn is_metered_price(price: &Price, plan: &PlanDefinition, rate: i64, meter_id: &str) -> bool {
    price.currency == CURRENCY
        && price.unit_amount == Some(rate)
        && bills_every(price, plan, UsageType::Metered)
        && price.meter() == Some(meter_id)
}

fn trace_outcome(plan: &str, kind: &'static str, id: &str, created: bool) {
    if created {
        tracing::info!(plan, kind, id, "Created billing object");
    } else {
        tracing::debug!(plan, kind, id, "Reusing billing object");
    }
}
