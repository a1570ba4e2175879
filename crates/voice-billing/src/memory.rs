//! In-memory billing API
//!
//! For tests and local development without Stripe credentials. Objects get
//! Stripe-shaped ids (`mtr_1`, `prod_2`, `price_3`, `cs_4`).

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::api::{
    BillingApi, CheckoutSessionRef, Meter, MeterEvent, MeterStatus, Metadata, NewCheckoutSession, NewMeter,
    NewPrice, NewProduct, Price, Product, Recurring,
};
use crate::catalog::INTERVAL_COUNT;
use crate::error::{BillingError, Result};

/// Operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    ListMeters,
    CreateMeter,
    ReactivateMeter,
    ListProducts,
    CreateProduct,
    UpdateProduct,
    ListPrices,
    CreatePrice,
    CreateCheckoutSession,
    CreateMeterEvent,
}

#[derive(Default)]
struct State {
    next_id: u64,
    meters: Vec<Meter>,
    products: Vec<Product>,
    prices: Vec<Price>,
    sessions: Vec<NewCheckoutSession>,
    meter_events: Vec<MeterEvent>,
    calls: HashMap<Operation, usize>,
    /// Fail the nth (1-based) call of an operation
    failures: HashMap<Operation, usize>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    fn record(&mut self, op: Operation) -> Result<()> {
        let count = {
            let count = self.calls.entry(op).or_default();
            *count += 1;
            *count
        };
        if self.failures.get(&op) == Some(&count) {
            return Err(BillingError::Api {
                status: 500,
                message: format!("injected failure for {:?}", op),
            });
        }
        Ok(())
    }
}

/// Billing API that keeps all objects in memory
#[derive(Default)]
pub struct MemoryBillingApi {
    state: Mutex<State>,
}

impl MemoryBillingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `nth` (1-based) call of `op` fail with a 500
    pub async fn fail_on(&self, op: Operation, nth: usize) {
        self.state.lock().await.failures.insert(op, nth);
    }

    /// Insert a product as if it already existed remotely
    pub async fn seed_product(&self, name: &str, metadata: Metadata) -> Product {
        let mut state = self.state.lock().await;
        let product = Product {
            id: state.id("prod"),
            name: name.to_string(),
            description: None,
            metadata,
        };
        state.products.push(product.clone());
        product
    }

    /// Insert a meter as if it already existed remotely
    pub async fn seed_meter(&self, display_name: &str, event_name: &str, status: MeterStatus) -> Meter {
        let mut state = self.state.lock().await;
        let meter = Meter {
            id: state.id("mtr"),
            display_name: display_name.to_string(),
            event_name: event_name.to_string(),
            status,
            metadata: Metadata::new(),
        };
        state.meters.push(meter.clone());
        meter
    }

    /// Insert a price with an arbitrary recurrence, keeping its id
    pub async fn seed_price(&self, price: Price) {
        self.state.lock().await.prices.push(price);
    }

    pub async fn meters(&self) -> Vec<Meter> {
        self.state.lock().await.meters.clone()
    }

    pub async fn products(&self) -> Vec<Product> {
        self.state.lock().await.products.clone()
    }

    pub async fn prices(&self) -> Vec<Price> {
        self.state.lock().await.prices.clone()
    }

    /// Checkout sessions created so far, as requested
    pub async fn sessions(&self) -> Vec<NewCheckoutSession> {
        self.state.lock().await.sessions.clone()
    }

    pub async fn meter_events(&self) -> Vec<MeterEvent> {
        self.state.lock().await.meter_events.clone()
    }

    /// Total number of API calls made
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.values().sum()
    }
}

#[async_trait]
impl BillingApi for MemoryBillingApi {
    async fn list_meters(&self) -> Result<Vec<Meter>> {
        let mut state = self.state.lock().await;
        state.record(Operation::ListMeters)?;
        Ok(state.meters.clone())
    }

    async fn create_meter(&self, params: &NewMeter) -> Result<Meter> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateMeter)?;
        let meter = Meter {
            id: state.id("mtr"),
            display_name: params.display_name.clone(),
            event_name: params.event_name.clone(),
            status: MeterStatus::Active,
            metadata: params.metadata.clone(),
        };
        state.meters.push(meter.clone());
        Ok(meter)
    }

    async fn reactivate_meter(&self, meter_id: &str) -> Result<Meter> {
        let mut state = self.state.lock().await;
        state.record(Operation::ReactivateMeter)?;
        let meter = state
            .meters
            .iter_mut()
            .find(|m| m.id == meter_id)
            .ok_or_else(|| BillingError::Api {
                status: 404,
                message: format!("No such meter: '{}'", meter_id),
            })?;
        meter.status = MeterStatus::Active;
        Ok(meter.clone())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let mut state = self.state.lock().await;
        state.record(Operation::ListProducts)?;
        Ok(state.products.clone())
    }

    async fn create_product(&self, params: &NewProduct) -> Result<Product> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateProduct)?;
        let product = Product {
            id: state.id("prod"),
            name: params.name.clone(),
            description: params.description.clone(),
            metadata: params.metadata.clone(),
        };
        state.products.push(product.clone());
        Ok(product)
    }

    async fn update_product_metadata(&self, product_id: &str, metadata: &Metadata) -> Result<Product> {
        let mut state = self.state.lock().await;
        state.record(Operation::UpdateProduct)?;
        let product = state
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| BillingError::Api {
                status: 404,
                message: format!("No such product: '{}'", product_id),
            })?;
        product.metadata.extend(metadata.clone());
        Ok(product.clone())
    }

    async fn list_prices(&self, product_id: &str) -> Result<Vec<Price>> {
        let mut state = self.state.lock().await;
        state.record(Operation::ListPrices)?;
        Ok(state.prices.iter().filter(|p| p.product == product_id).cloned().collect())
    }

    async fn create_price(&self, params: &NewPrice) -> Result<Price> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreatePrice)?;
        let price = Price {
            id: state.id("price"),
            product: params.product.clone(),
            currency: params.currency.clone(),
            unit_amount: Some(params.unit_amount),
            recurring: Some(Recurring {
                interval: params.interval,
                interval_count: INTERVAL_COUNT,
                usage_type: params.usage_type,
                meter: params.meter.clone(),
            }),
            metadata: params.metadata.clone(),
        };
        state.prices.push(price.clone());
        Ok(price)
    }

    async fn create_checkout_session(&self, params: &NewCheckoutSession) -> Result<CheckoutSessionRef> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateCheckoutSession)?;
        let id = state.id("cs");
        state.sessions.push(params.clone());
        Ok(CheckoutSessionRef {
            url: Some(format!("https://checkout.example.test/pay/{}", id)),
            id,
        })
    }

    async fn create_meter_event(&self, event: &MeterEvent) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateMeterEvent)?;
        state.meter_events.push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "MemoryBilling"
    }
}
