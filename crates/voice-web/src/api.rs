//! API Client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::GatewayError;

/// Plan tier as listed by the backend
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub interval: String,
    pub included_minutes: u64,
    pub overage_rate_cents: Option<i64>,
    pub features: Vec<String>,
    pub popular: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanProduct {
    pub id: String,
    pub product_id: String,
}

/// Values the browser needs before it can start a checkout
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BillingConfig {
    pub publishable_key: Option<String>,
    pub plans: Vec<PlanProduct>,
}

impl BillingConfig {
    /// Provisioned product for a plan key
    pub fn product_id(&self, plan_key: &str) -> Option<&str> {
        self.plans
            .iter()
            .find(|p| p.id == plan_key)
            .map(|p| p.product_id.as_str())
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionBody<'a> {
    pub plan_id: &'a str,
    pub product_id: &'a str,
    pub user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<&'a str>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionCreated {
    pub session_id: String,
}

/// Subscription as recorded by the backend webhook
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub customer_id: Option<String>,
    pub plan_key: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }
}

/// Absolute URL for a backend path
fn endpoint(path: &str) -> String {
    let origin = web_sys::window()
        .and_then(|w| w.location().origin().ok())
        .unwrap_or_else(|| "http://localhost:3000".into());
    format!("{origin}{path}")
}

/// Human-readable message from a non-2xx response body
fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(String::from))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("Request failed ({status})"))
}

async fn backend_error(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    GatewayError::Backend {
        status,
        message: error_message(status, &body),
    }
}

async fn get_json<T: for<'de> Deserialize<'de>>(path: &str) -> Result<T, GatewayError> {
    let response = reqwest::Client::new().get(endpoint(path)).send().await?;

    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(backend_error(response).await)
    }
}

/// Plan catalog for the pricing page
pub async fn fetch_plans() -> Result<Vec<Plan>, GatewayError> {
    get_json("/api/plans").await
}

pub async fn fetch_billing_config() -> Result<BillingConfig, GatewayError> {
    get_json("/api/billing/config").await
}

/// Ask the backend for a checkout session
pub async fn create_checkout_session(body: &CheckoutSessionBody<'_>) -> Result<CheckoutSessionCreated, GatewayError> {
    let response = reqwest::Client::new()
        .post(endpoint("/api/create-checkout-session"))
        .json(body)
        .send()
        .await?;

    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(backend_error(response).await)
    }
}

/// Subscription for a user, `None` if they have not subscribed yet
pub async fn fetch_subscription(user_id: &str) -> Result<Option<Subscription>, GatewayError> {
    match get_json(&format!("/api/subscriptions/{user_id}")).await {
        Ok(subscription) => Ok(Some(subscription)),
        Err(GatewayError::Backend { status: 404, .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_body_omits_missing_customer() {
        let body = CheckoutSessionBody {
            plan_id: "essential",
            product_id: "prod_1",
            user_id: "user_42",
            customer_id: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "planId": "essential", "productId": "prod_1", "userId": "user_42" })
        );

        let body = CheckoutSessionBody {
            customer_id: Some("cus_1"),
            ..body
        };
        assert_eq!(serde_json::to_value(&body).unwrap()["customerId"], "cus_1");
    }

    #[test]
    fn test_error_message_from_body() {
        assert_eq!(
            error_message(400, r#"{"message":"Unknown plan","code":"UNKNOWN_PLAN"}"#),
            "Unknown plan"
        );
        assert_eq!(error_message(502, "<html>bad gateway</html>"), "Request failed (502)");
        assert_eq!(error_message(500, r#"{"message":""}"#), "Request failed (500)");
    }

    #[test]
    fn test_billing_config_lookup() {
        let config: BillingConfig = serde_json::from_str(
            r#"{"publishableKey":"pk_test","plans":[{"id":"essential","productId":"prod_1"}]}"#,
        )
        .unwrap();

        assert_eq!(config.publishable_key.as_deref(), Some("pk_test"));
        assert_eq!(config.product_id("essential"), Some("prod_1"));
        assert_eq!(config.product_id("enterprise"), None);
    }

    #[test]
    fn test_session_response_ignores_url() {
        let created: CheckoutSessionCreated =
            serde_json::from_str(r#"{"sessionId":"cs_1","url":"https://checkout.stripe.com/c/pay/cs_1"}"#).unwrap();
        assert_eq!(created.session_id, "cs_1");
    }
}
