//! Stripe billing client
//!
//! Products and checkout sessions use async-stripe's typed calls. Meters,
//! meter events and prices (which carry `recurring[meter]`) are posted as
//! forms through the same `stripe::Client`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, CreateProduct, CustomerId, ListProducts, ProductId, RequestStrategy,
    StripeError, UpdateProduct,
};
use uuid::Uuid;

use crate::api::{
    BillingApi, CheckoutSessionRef, METER_VALUE_KEY, Meter, MeterEvent, Metadata, NewCheckoutSession, NewMeter,
    NewPrice, NewProduct, Price, Product, UsageType,
};
use crate::catalog::{BillingInterval, INTERVAL_COUNT};
use crate::config::BillingConfig;
use crate::error::{BillingError, Result};

const PAGE_LIMIT: u64 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of a Stripe list endpoint
#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

trait Listed {
    fn id(&self) -> &str;
}

impl Listed for Meter {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Listed for Price {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Serialize)]
struct MeterForm<'a> {
    display_name: &'a str,
    event_name: &'a str,
    default_aggregation: Aggregation,
    value_settings: ValueSettings<'a>,
    customer_mapping: CustomerMapping,
}

#[derive(Serialize)]
struct Aggregation {
    formula: &'static str,
}

#[derive(Serialize)]
struct ValueSettings<'a> {
    event_payload_key: &'a str,
}

#[derive(Serialize)]
struct CustomerMapping {
    #[serde(rename = "type")]
    kind: &'static str,
    event_payload_key: &'static str,
}

#[derive(Serialize)]
struct PriceForm<'a> {
    product: &'a str,
    currency: &'a str,
    unit_amount: i64,
    recurring: RecurringForm<'a>,
    metadata: &'a Metadata,
}

#[derive(Serialize)]
struct RecurringForm<'a> {
    interval: BillingInterval,
    interval_count: u32,
    usage_type: UsageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    meter: Option<&'a str>,
}

#[derive(Serialize)]
struct MeterEventForm<'a> {
    event_name: &'a str,
    payload: BTreeMap<&'static str, String>,
    timestamp: i64,
}

/// Billing API backed by Stripe
pub struct StripeBillingApi {
    client: Client,
    /// Mixed into every idempotency key so a later run with the same
    /// parameters is not answered from Stripe's idempotency cache.
    run_id: Uuid,
}

impl StripeBillingApi {
    pub fn new(secret_key: &str, base_url: &str) -> Result<Self> {
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(BillingError::Config(format!("Invalid Stripe API base: {}", base_url)));
        }
        Ok(Self {
            client: Client::from_url(base_url, secret_key),
            run_id: Uuid::new_v4(),
        })
    }

    pub fn from_config(config: &BillingConfig) -> Result<Self> {
        Self::new(&config.secret_key, &config.api_base)
    }

    /// Key a create request by this run and its own content, so a repeated
    /// identical create within the run collapses onto the first one.
    fn idempotency_key<F: Serialize>(&self, path: &str, form: &F) -> Result<String> {
        let body = serde_json::to_value(form).map_err(|e| BillingError::Http(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(self.run_id.as_bytes());
        hasher.update(path.as_bytes());
        hasher.update(body.to_string().as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    fn idempotent_client(&self, key: String) -> Client {
        self.client.clone().with_strategy(RequestStrategy::Idempotent(key))
    }

    async fn create_form<T, F>(&self, path: &str, form: &F) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
        F: Serialize,
    {
        let client = self.idempotent_client(self.idempotency_key(path, form)?);
        send(client.post_form(path, form)).await
    }

    /// Follow `has_more` / `starting_after` until the list is exhausted
    async fn list_all<T>(&self, path: &str, filters: &[(&'static str, &str)]) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Listed + Send + 'static,
    {
        let mut items: Vec<T> = Vec::new();
        loop {
            let mut query: BTreeMap<&str, String> = filters.iter().map(|(k, v)| (*k, (*v).to_string())).collect();
            query.insert("limit", PAGE_LIMIT.to_string());
            if let Some(last) = items.last() {
                query.insert("starting_after", last.id().to_string());
            }

            let page: Page<T> = send(self.client.get_query(path, &query)).await?;
            let done = !page.has_more || page.data.is_empty();
            items.extend(page.data);
            if done {
                return Ok(items);
            }
        }
    }
}

async fn send<T>(request: impl Future<Output = std::result::Result<T, StripeError>>) -> Result<T> {
    match tokio::time::timeout(REQUEST_TIMEOUT, request).await {
        Ok(result) => result.map_err(|e| {
            let err = BillingError::from(e);
            tracing::debug!(error = %err, "Stripe request failed");
            err
        }),
        Err(_) => Err(BillingError::Http(format!(
            "Stripe request timed out after {}s",
            REQUEST_TIMEOUT.as_secs()
        ))),
    }
}

fn parse_product_id(id: &str) -> Result<ProductId> {
    id.parse().map_err(|e| BillingError::Api {
        status: 400,
        message: format!("Invalid product id '{}': {}", id, e),
    })
}

fn into_product(product: stripe::Product) -> Product {
    Product {
        id: product.id.to_string(),
        name: product.name.unwrap_or_default(),
        description: product.description,
        metadata: product.metadata.unwrap_or_default(),
    }
}

fn meter_form(params: &NewMeter) -> MeterForm<'_> {
    // Meters do not carry metadata on Stripe; the plan tags live on the product.
    MeterForm {
        display_name: &params.display_name,
        event_name: &params.event_name,
        default_aggregation: Aggregation { formula: "sum" },
        value_settings: ValueSettings {
            event_payload_key: &params.value_key,
        },
        customer_mapping: CustomerMapping {
            kind: "by_id",
            event_payload_key: "stripe_customer_id",
        },
    }
}

fn price_form(params: &NewPrice) -> PriceForm<'_> {
    PriceForm {
        product: &params.product,
        currency: &params.currency,
        unit_amount: params.unit_amount,
        recurring: RecurringForm {
            interval: params.interval,
            interval_count: INTERVAL_COUNT,
            usage_type: params.usage_type,
            meter: params.meter.as_deref(),
        },
        metadata: &params.metadata,
    }
}

fn meter_event_form(event: &MeterEvent) -> MeterEventForm<'_> {
    let payload = BTreeMap::from([
        ("stripe_customer_id", event.customer.clone()),
        (METER_VALUE_KEY, event.value.to_string()),
    ]);
    MeterEventForm {
        event_name: &event.event_name,
        payload,
        timestamp: chrono::Utc::now().timestamp(),
    }
}

fn checkout_params(params: &NewCheckoutSession) -> Result<CreateCheckoutSession<'_>> {
    let customer = params
        .customer
        .as_deref()
        .map(|id| {
            id.parse::<CustomerId>().map_err(|e| BillingError::Api {
                status: 400,
                message: format!("Invalid customer id '{}': {}", id, e),
            })
        })
        .transpose()?;

    let line_items = params
        .line_items
        .iter()
        .map(|item| CreateCheckoutSessionLineItems {
            price: Some(item.price.clone()),
            quantity: item.wire_quantity(),
            ..Default::default()
        })
        .collect();

    Ok(CreateCheckoutSession {
        mode: Some(CheckoutSessionMode::Subscription),
        success_url: Some(&params.success_url),
        cancel_url: Some(&params.cancel_url),
        client_reference_id: params.client_reference_id.as_deref(),
        customer,
        line_items: Some(line_items),
        metadata: Some(params.metadata.clone()),
        subscription_data: Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(params.subscription_metadata.clone()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[async_trait]
impl BillingApi for StripeBillingApi {
    async fn list_meters(&self) -> Result<Vec<Meter>> {
        // No status filter: a deactivated meter still owns its event name
        self.list_all("/billing/meters", &[]).await
    }

    async fn create_meter(&self, params: &NewMeter) -> Result<Meter> {
        self.create_form("/billing/meters", &meter_form(params)).await
    }

    async fn reactivate_meter(&self, meter_id: &str) -> Result<Meter> {
        send(self.client.post(&format!("/billing/meters/{}/reactivate", meter_id))).await
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let mut products = Vec::new();
        let mut starting_after: Option<ProductId> = None;
        loop {
            let params = ListProducts {
                active: Some(true),
                limit: Some(PAGE_LIMIT),
                starting_after: starting_after.take(),
                ..Default::default()
            };
            let page = send(stripe::Product::list(&self.client, &params)).await?;
            starting_after = page.data.last().map(|p| p.id.clone());
            let done = !page.has_more || page.data.is_empty();
            products.extend(page.data.into_iter().map(into_product));
            if done {
                return Ok(products);
            }
        }
    }

    async fn create_product(&self, params: &NewProduct) -> Result<Product> {
        let mut create = CreateProduct::new(&params.name);
        create.description = params.description.as_deref();
        create.metadata = Some(params.metadata.clone());

        let client = self.idempotent_client(self.idempotency_key("/products", &create)?);
        let product = send(stripe::Product::create(&client, create)).await?;
        Ok(into_product(product))
    }

    async fn update_product_metadata(&self, product_id: &str, metadata: &Metadata) -> Result<Product> {
        // Merged on Stripe's side; sent without an idempotency key
        let id = parse_product_id(product_id)?;
        let params = UpdateProduct {
            metadata: Some(metadata.clone()),
            ..Default::default()
        };
        let product = send(stripe::Product::update(&self.client, &id, params)).await?;
        Ok(into_product(product))
    }

    async fn list_prices(&self, product_id: &str) -> Result<Vec<Price>> {
        self.list_all("/prices", &[("product", product_id), ("active", "true")]).await
    }

    async fn create_price(&self, params: &NewPrice) -> Result<Price> {
        self.create_form("/prices", &price_form(params)).await
    }

    async fn create_checkout_session(&self, params: &NewCheckoutSession) -> Result<CheckoutSessionRef> {
        let session = send(CheckoutSession::create(&self.client, checkout_params(params)?)).await?;
        Ok(CheckoutSessionRef {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn create_meter_event(&self, event: &MeterEvent) -> Result<()> {
        let _: serde_json::Value = send(self.client.post_form("/billing/meter_events", &meter_event_form(event))).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Stripe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{LineItem, MeterStatus, metadata};
    use mockito::Matcher;

    fn api(server: &mockito::ServerGuard) -> StripeBillingApi {
        StripeBillingApi::new("sk_test_123", &server.url()).unwrap()
    }

    fn json(mock: mockito::Mock, body: &str) -> mockito::Mock {
        mock.with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    fn session(line_items: Vec<LineItem>) -> NewCheckoutSession {
        NewCheckoutSession {
            line_items,
            success_url: "https://app.test/dashboard".into(),
            cancel_url: "https://app.test/pricing".into(),
            client_reference_id: Some("user_42".into()),
            customer: None,
            metadata: metadata([("plan_key", "essential")]),
            subscription_metadata: metadata([("plan_key", "essential")]),
        }
    }

    #[test]
    fn test_rejects_non_http_base() {
        let err = StripeBillingApi::new("sk_test_123", "api.stripe.com").err().unwrap();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[tokio::test]
    async fn test_list_products_follows_pagination() {
        let mut server = mockito::Server::new_async().await;
        let first = json(
            server
                .mock("GET", "/v1/products")
                .match_query(Matcher::Regex("^active=true&limit=100$".into()))
                .match_header("authorization", "Bearer sk_test_123"),
            r#"{"object":"list","url":"/v1/products","has_more":true,
                "data":[{"id":"prod_1","object":"product","name":"Voice AI Essential","metadata":{}}]}"#,
        )
        .create_async()
        .await;
        let second = json(
            server
                .mock("GET", "/v1/products")
                .match_query(Matcher::UrlEncoded("starting_after".into(), "prod_1".into())),
            r#"{"object":"list","url":"/v1/products","has_more":false,
                "data":[{"id":"prod_2","object":"product","name":"Voice AI Enterprise","description":null,
                         "metadata":{"plan_key":"enterprise"}}]}"#,
        )
        .create_async()
        .await;

        let products = api(&server).list_products().await.unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[1].name, "Voice AI Enterprise");
        assert_eq!(products[1].metadata.get("plan_key").map(String::as_str), Some("enterprise"));
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_meters_includes_inactive() {
        let mut server = mockito::Server::new_async().await;
        let mock = json(
            server
                .mock("GET", "/v1/billing/meters")
                .match_query(Matcher::Regex("^limit=100$".into())),
            r#"{"object":"list","url":"/v1/billing/meters","has_more":false,"data":[
                {"id":"mtr_1","object":"billing.meter","display_name":"Voice Minutes - Essential",
                 "event_name":"voice_minutes_essential","status":"inactive"}]}"#,
        )
        .create_async()
        .await;

        let meters = api(&server).list_meters().await.unwrap();
        assert_eq!(meters.len(), 1);
        assert_eq!(meters[0].status, MeterStatus::Inactive);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reactivate_meter() {
        let mut server = mockito::Server::new_async().await;
        let mock = json(
            server.mock("POST", "/v1/billing/meters/mtr_1/reactivate"),
            r#"{"id":"mtr_1","object":"billing.meter","display_name":"Voice Minutes - Essential",
                "event_name":"voice_minutes_essential","status":"active"}"#,
        )
        .create_async()
        .await;

        let meter = api(&server).reactivate_meter("mtr_1").await.unwrap();
        assert!(meter.is_active());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_metered_price_form() {
        let mut server = mockito::Server::new_async().await;
        let mock = json(
            server
                .mock("POST", "/v1/prices")
                .match_header("idempotency-key", Matcher::Regex("^[0-9a-f]{64}$".into()))
                .match_body(Matcher::AllOf(vec![
                    Matcher::UrlEncoded("product".into(), "prod_1".into()),
                    Matcher::UrlEncoded("unit_amount".into(), "10".into()),
                    Matcher::UrlEncoded("recurring[interval]".into(), "month".into()),
                    Matcher::UrlEncoded("recurring[interval_count]".into(), "1".into()),
                    Matcher::UrlEncoded("recurring[usage_type]".into(), "metered".into()),
                    Matcher::UrlEncoded("recurring[meter]".into(), "mtr_1".into()),
                    Matcher::UrlEncoded("metadata[plan_key]".into(), "essential".into()),
                ])),
            r#"{"id":"price_9","object":"price","product":"prod_1","currency":"usd","unit_amount":10,
                "recurring":{"interval":"month","interval_count":1,"usage_type":"metered","meter":"mtr_1"},"metadata":{}}"#,
        )
        .create_async()
        .await;

        let price = api(&server)
            .create_price(&NewPrice {
                product: "prod_1".into(),
                currency: "usd".into(),
                unit_amount: 10,
                interval: BillingInterval::Month,
                usage_type: UsageType::Metered,
                meter: Some("mtr_1".into()),
                metadata: metadata([("plan_key", "essential")]),
            })
            .await
            .unwrap();

        assert_eq!(price.usage_type(), Some(UsageType::Metered));
        assert_eq!(price.meter(), Some("mtr_1"));
        assert_eq!(price.recurring.map(|r| r.interval_count), Some(1));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_metadata_update_sends_no_idempotency_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = json(
            server
                .mock("POST", "/v1/products/prod_1")
                .match_header("idempotency-key", Matcher::Missing)
                .match_body(Matcher::UrlEncoded("metadata[meter_id]".into(), "mtr_2".into())),
            r#"{"id":"prod_1","object":"product","name":"Voice AI Essential","metadata":{"meter_id":"mtr_2"}}"#,
        )
        .expect(2)
        .create_async()
        .await;

        let api = api(&server);
        let patch = metadata([("meter_id", "mtr_2")]);
        api.update_product_metadata("prod_1", &patch).await.unwrap();
        let product = api.update_product_metadata("prod_1", &patch).await.unwrap();

        assert_eq!(product.metadata.get("meter_id").map(String::as_str), Some("mtr_2"));
        mock.assert_async().await;
    }

    #[test]
    fn test_metered_line_has_no_quantity() {
        let params = session(vec![
            LineItem {
                price: "price_base".into(),
                quantity: 1,
                usage_type: UsageType::Licensed,
            },
            LineItem {
                price: "price_metered".into(),
                quantity: 1,
                usage_type: UsageType::Metered,
            },
        ]);

        let create = checkout_params(&params).unwrap();
        let line_items = create.line_items.as_ref().unwrap();
        assert_eq!(line_items[0].quantity, Some(1));
        assert_eq!(line_items[1].price.as_deref(), Some("price_metered"));
        assert_eq!(line_items[1].quantity, None);

        // Serialized form carries line_items[1][price] but no line_items[1][quantity]
        let body = serde_json::to_value(&create).unwrap();
        assert_eq!(body["line_items"][0]["quantity"], 1);
        assert!(body["line_items"][1].get("quantity").is_none());
        assert_eq!(body["mode"], "subscription");
        assert_eq!(body["client_reference_id"], "user_42");
        assert_eq!(body["subscription_data"]["metadata"]["plan_key"], "essential");
    }

    #[tokio::test]
    async fn test_checkout_request_omits_metered_quantity() {
        use std::sync::{Arc, Mutex};

        let mut server = mockito::Server::new_async().await;
        let captured = Arc::new(Mutex::new(String::new()));
        let sink = captured.clone();
        let mock = server
            .mock("POST", "/v1/checkout/sessions")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("mode".into(), "subscription".into()),
                Matcher::UrlEncoded("line_items[0][price]".into(), "price_base".into()),
                Matcher::UrlEncoded("line_items[0][quantity]".into(), "1".into()),
                Matcher::UrlEncoded("line_items[1][price]".into(), "price_metered".into()),
            ]))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |request| {
                *sink.lock().unwrap() = request.utf8_lossy_body().unwrap().into_owned();
                br#"{"error":{"type":"invalid_request_error","message":"stop here"}}"#.to_vec()
            })
            .create_async()
            .await;

        let params = session(vec![
            LineItem {
                price: "price_base".into(),
                quantity: 1,
                usage_type: UsageType::Licensed,
            },
            LineItem {
                price: "price_metered".into(),
                quantity: 1,
                usage_type: UsageType::Metered,
            },
        ]);
        let err = api(&server).create_checkout_session(&params).await.unwrap_err();
        assert!(matches!(err, BillingError::Api { status: 400, .. }));
        mock.assert_async().await;

        let body = captured.lock().unwrap().clone();
        assert!(body.contains("price_metered"));
        assert!(!body.contains("line_items[1][quantity]"));
        assert!(!body.contains("line_items%5B1%5D%5Bquantity%5D"));
    }

    #[test]
    fn test_checkout_rejects_malformed_customer() {
        let mut params = session(Vec::new());
        params.customer = Some("user_42".into());
        assert!(matches!(
            checkout_params(&params),
            Err(BillingError::Api { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_error_body_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/billing/meters")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"type":"invalid_request_error","message":"Invalid API Key provided"}}"#)
            .create_async()
            .await;

        let err = api(&server).list_meters().await.unwrap_err();
        match err {
            BillingError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API Key provided");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_idempotency_key_is_per_run() {
        let params = NewPrice {
            product: "prod_1".into(),
            currency: "usd".into(),
            unit_amount: 2900,
            interval: BillingInterval::Month,
            usage_type: UsageType::Licensed,
            meter: None,
            metadata: metadata([("b", "2"), ("a", "1")]),
        };
        let first_run = StripeBillingApi::new("sk_test_123", "https://api.stripe.com").unwrap();
        let second_run = StripeBillingApi::new("sk_test_123", "https://api.stripe.com").unwrap();

        let a = first_run.idempotency_key("/prices", &price_form(&params)).unwrap();
        let b = first_run.idempotency_key("/prices", &price_form(&params.clone())).unwrap();
        let c = second_run.idempotency_key("/prices", &price_form(&params)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, c);
    }
}
