//! Checkout Session Builder
//!
//! Turns a plan key and redirect URLs into a subscription-mode hosted
//! checkout session referencing the provisioned prices.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::{
    BillingApi, CheckoutSessionRef, LineItem, Metadata, MeterEvent, NewCheckoutSession, UsageType, metadata,
};
use crate::catalog::{PlanCatalog, PlanDefinition};
use crate::error::{BillingError, Result};
use crate::reconcile::{ProvisionedPlans, RemoteBillingRefs};

/// Request to create a checkout session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    /// Plan to subscribe to
    pub plan_key: String,

    /// URL to redirect after successful payment
    pub success_url: String,

    /// URL to redirect if checkout is cancelled
    pub cancel_url: String,

    /// End-user id, echoed back on the completed session
    #[serde(default)]
    pub client_reference_id: Option<String>,

    /// Existing Stripe customer to attach the subscription to
    #[serde(default)]
    pub customer_id: Option<String>,
}

impl CheckoutSessionRequest {
    pub fn new(plan_key: impl Into<String>, success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        Self {
            plan_key: plan_key.into(),
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
            client_reference_id: None,
            customer_id: None,
        }
    }
}

/// Builds checkout sessions from the catalog and its provisioned ids.
///
/// Holds only read-only state, so one instance serves concurrent requests.
#[derive(Clone)]
pub struct CheckoutSessionBuilder {
    catalog: Arc<PlanCatalog>,
    provisioned: Arc<ProvisionedPlans>,
    api: Arc<dyn BillingApi>,
}

impl CheckoutSessionBuilder {
    pub fn new(catalog: Arc<PlanCatalog>, provisioned: Arc<ProvisionedPlans>, api: Arc<dyn BillingApi>) -> Self {
        Self {
            catalog,
            provisioned,
            api,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn provisioned(&self) -> &ProvisionedPlans {
        &self.provisioned
    }

    /// Resolve a plan and its remote ids without touching the network
    pub fn resolve(&self, plan_key: &str) -> Result<(&PlanDefinition, &RemoteBillingRefs)> {
        let plan = self.catalog.get(plan_key)?;
        let refs = self
            .provisioned
            .get(plan_key)
            .ok_or_else(|| BillingError::PlanNotProvisioned(plan_key.to_string()))?;
        Ok((plan, refs))
    }

    /// Base price, plus the metered overage price when the plan has one
    pub fn line_items(&self, plan_key: &str) -> Result<Vec<LineItem>> {
        let (_, refs) = self.resolve(plan_key)?;
        Ok(line_items(refs))
    }

    /// Create a hosted checkout session (subscription mode)
    pub async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<CheckoutSessionRef> {
        let (plan, refs) = self.resolve(&request.plan_key)?;
        let metadata = session_metadata(plan, refs);

        let params = NewCheckoutSession {
            line_items: line_items(refs),
            success_url: request.success_url.clone(),
            cancel_url: request.cancel_url.clone(),
            client_reference_id: request.client_reference_id.clone(),
            customer: request.customer_id.clone(),
            subscription_metadata: metadata.clone(),
            metadata,
        };

        let session = self
            .api
            .create_checkout_session(&params)
            .await
            .map_err(|source| BillingError::CheckoutCreation {
                plan: plan.key.clone(),
                source: Box::new(source),
            })?;

        tracing::info!(
            plan = %plan.key,
            session_id = %session.id,
            line_items = params.line_items.len(),
            "Created checkout session"
        );
        Ok(session)
    }

    /// Report voice minutes against the plan's usage meter
    pub async fn report_usage(&self, plan_key: &str, customer_id: &str, minutes: u64) -> Result<()> {
        let (plan, refs) = self.resolve(plan_key)?;
        if refs.meter_id.is_none() {
            return Err(BillingError::PlanNotProvisioned(format!("{} has no usage meter", plan_key)));
        }
        if minutes == 0 {
            return Ok(());
        }

        let event = MeterEvent {
            event_name: plan.meter_event_name(),
            customer: customer_id.to_string(),
            value: minutes,
        };
        self.api.create_meter_event(&event).await?;

        tracing::debug!(plan = plan_key, customer = customer_id, minutes, "Reported usage");
        Ok(())
    }
}

fn line_items(refs: &RemoteBillingRefs) -> Vec<LineItem> {
    let mut items = vec![LineItem {
        price: refs.base_price_id.clone(),
        quantity: 1,
        usage_type: UsageType::Licensed,
    }];
    if let Some(ref metered) = refs.metered_price_id {
        items.push(LineItem {
            price: metered.clone(),
            quantity: 1,
            usage_type: UsageType::Metered,
        });
    }
    items
}

fn session_metadata(plan: &PlanDefinition, refs: &RemoteBillingRefs) -> Metadata {
    let mut metadata = metadata([
        ("plan_key", plan.key.clone()),
        ("included_minutes", plan.included_minutes.to_string()),
    ]);
    if let Some(rate) = plan.overage_rate_cents {
        metadata.insert("overage_rate_cents".into(), rate.to_string());
    }
    if let Some(ref meter_id) = refs.meter_id {
        metadata.insert("meter_id".into(), meter_id.clone());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBillingApi, Operation};
    use crate::reconcile::reconcile;

    async fn provisioned_builder() -> (CheckoutSessionBuilder, Arc<MemoryBillingApi>) {
        let api = Arc::new(MemoryBillingApi::new());
        let catalog = Arc::new(PlanCatalog::default());
        let provisioned = reconcile(&catalog, api.as_ref()).await.unwrap();
        let builder = CheckoutSessionBuilder::new(catalog, Arc::new(provisioned), api.clone());
        (builder, api)
    }

    fn request(plan: &str) -> CheckoutSessionRequest {
        CheckoutSessionRequest::new(plan, "https://app.test/dashboard", "https://app.test/pricing")
    }

    #[tokio::test]
    async fn test_session_with_metered_price() {
        let (builder, api) = provisioned_builder().await;
        let refs = builder.provisioned().get("essential").unwrap().clone();

        let session = builder.create_checkout_session(&request("essential")).await.unwrap();
        assert!(!session.id.is_empty());

        let sessions = api.sessions().await;
        assert_eq!(sessions.len(), 1);
        let sent = &sessions[0];
        assert_eq!(
            sent.line_items,
            vec![
                LineItem {
                    price: refs.base_price_id.clone(),
                    quantity: 1,
                    usage_type: UsageType::Licensed,
                },
                LineItem {
                    price: refs.metered_price_id.clone().unwrap(),
                    quantity: 1,
                    usage_type: UsageType::Metered,
                },
            ]
        );
        // Only the base line sends a quantity to the provider
        assert_eq!(sent.line_items[0].wire_quantity(), Some(1));
        assert_eq!(sent.line_items[1].wire_quantity(), None);
        assert_eq!(sent.success_url, "https://app.test/dashboard");
        assert_eq!(sent.metadata.get("plan_key").map(String::as_str), Some("essential"));
        assert_eq!(sent.metadata.get("overage_rate_cents").map(String::as_str), Some("10"));
        assert_eq!(sent.metadata.get("meter_id"), refs.meter_id.as_ref());
        assert_eq!(sent.subscription_metadata, sent.metadata);
    }

    #[tokio::test]
    async fn test_single_line_without_metered_price() {
        let api = Arc::new(MemoryBillingApi::new());
        let mut provisioned = ProvisionedPlans::new();
        provisioned.insert(
            "essential",
            RemoteBillingRefs {
                meter_id: None,
                product_id: "prod_1".into(),
                base_price_id: "price_1".into(),
                metered_price_id: None,
            },
        );
        let builder = CheckoutSessionBuilder::new(Arc::new(PlanCatalog::default()), Arc::new(provisioned), api.clone());

        builder.create_checkout_session(&request("essential")).await.unwrap();
        let sessions = api.sessions().await;
        assert_eq!(
            sessions[0].line_items,
            vec![LineItem {
                price: "price_1".into(),
                quantity: 1,
                usage_type: UsageType::Licensed,
            }]
        );
    }

    #[tokio::test]
    async fn test_unprovisioned_plan_makes_no_call() {
        let api = Arc::new(MemoryBillingApi::new());
        let builder = CheckoutSessionBuilder::new(
            Arc::new(PlanCatalog::default()),
            Arc::new(ProvisionedPlans::new()),
            api.clone(),
        );

        let err = builder.create_checkout_session(&request("essential")).await.unwrap_err();
        assert!(matches!(err, BillingError::PlanNotProvisioned(ref key) if key == "essential"));
        assert_eq!(api.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_plan() {
        let (builder, _) = provisioned_builder().await;
        let err = builder.create_checkout_session(&request("platinum")).await.unwrap_err();
        assert!(matches!(err, BillingError::UnknownPlan(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_carries_plan() {
        let (builder, api) = provisioned_builder().await;
        api.fail_on(Operation::CreateCheckoutSession, 1).await;

        let err = builder.create_checkout_session(&request("professional")).await.unwrap_err();
        match err {
            BillingError::CheckoutCreation { plan, source } => {
                assert_eq!(plan, "professional");
                assert!(matches!(*source, BillingError::Api { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_report_usage_uses_plan_meter() {
        let (builder, api) = provisioned_builder().await;

        builder.report_usage("professional", "cus_123", 42).await.unwrap();
        builder.report_usage("professional", "cus_123", 0).await.unwrap();

        let events = api.meter_events().await;
        assert_eq!(
            events,
            vec![MeterEvent {
                event_name: "voice_minutes_professional".into(),
                customer: "cus_123".into(),
                value: 42,
            }]
        );
    }
}
