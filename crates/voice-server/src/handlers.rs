//! HTTP Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

use voice_billing::{
    BillingError, BillingInterval, CheckoutSessionBuilder, CheckoutSessionRequest, SubscriptionRecord,
    SubscriptionStore, WebhookHandler,
};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub billing_configured: bool,
    pub provisioned_plans: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable, shown to the end user
    pub message: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub interval: BillingInterval,
    pub included_minutes: u64,
    pub overage_rate_cents: Option<i64>,
    pub features: Vec<String>,
    pub popular: bool,
    pub product_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProduct {
    pub id: String,
    pub product_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingConfigResponse {
    pub publishable_key: Option<String>,
    pub plans: Vec<PlanProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutSessionBody {
    pub plan_id: String,
    #[serde(default)]
    pub product_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutSessionResponse {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBody {
    pub customer_id: String,
    pub plan_id: String,
    pub minutes: u64,
}

fn error(status: StatusCode, message: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
            code: code.into(),
        }),
    )
}

fn billing_error(e: &BillingError) -> ApiError {
    let (status, code) = match e {
        BillingError::UnknownPlan(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_PLAN"),
        BillingError::PlanNotProvisioned(_) => (StatusCode::CONFLICT, "PLAN_NOT_PROVISIONED"),
        BillingError::CheckoutCreation { .. } => (StatusCode::BAD_GATEWAY, "CHECKOUT_ERROR"),
        e if e.is_retryable() => (StatusCode::SERVICE_UNAVAILABLE, "BILLING_UNAVAILABLE"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "BILLING_ERROR"),
    };
    error(status, e.user_message(), code)
}

fn payments(state: &AppState) -> Result<&CheckoutSessionBuilder, ApiError> {
    state.checkout.as_ref().ok_or_else(|| {
        error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Payments are not configured",
            "PAYMENTS_DISABLED",
        )
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        billing_configured: state.checkout.is_some(),
        provisioned_plans: state.checkout.as_ref().map_or(0, |c| c.provisioned().len()),
    })
}

/// Plan catalog for the pricing page
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PlanResponse>> {
    let plans = state
        .catalog
        .iter()
        .map(|plan| PlanResponse {
            id: plan.key.clone(),
            name: plan.name.clone(),
            price_cents: plan.price_cents,
            interval: plan.interval,
            included_minutes: plan.included_minutes,
            overage_rate_cents: plan.overage_rate_cents,
            features: plan.features.clone(),
            popular: plan.popular,
            product_id: state
                .checkout
                .as_ref()
                .and_then(|c| c.provisioned().get(&plan.key))
                .map(|refs| refs.product_id.clone()),
        })
        .collect();

    Json(plans)
}

/// Browser-side billing configuration
pub async fn billing_config(State(state): State<AppState>) -> Json<BillingConfigResponse> {
    let plans = match state.checkout {
        Some(ref checkout) => state
            .catalog
            .iter()
            .filter_map(|plan| {
                checkout.provisioned().get(&plan.key).map(|refs| PlanProduct {
                    id: plan.key.clone(),
                    product_id: refs.product_id.clone(),
                })
            })
            .collect(),
        None => Vec::new(),
    };

    Json(BillingConfigResponse {
        publishable_key: state.publishable_key.clone(),
        plans,
    })
}

/// Create a Stripe checkout session for a plan
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateCheckoutSessionBody>,
) -> Result<Json<CreateCheckoutSessionResponse>, ApiError> {
    let checkout = payments(&state)?;

    if payload.user_id.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "You must be signed in to subscribe.", "MISSING_USER"));
    }

    let (_, refs) = checkout.resolve(&payload.plan_id).map_err(|e| billing_error(&e))?;
    if let Some(ref product_id) = payload.product_id {
        if !product_id.is_empty() && *product_id != refs.product_id {
            tracing::warn!(plan = %payload.plan_id, product_id = %product_id, "Checkout product mismatch");
            return Err(error(
                StatusCode::BAD_REQUEST,
                "The selected product does not match the plan.",
                "PRODUCT_MISMATCH",
            ));
        }
    }

    let mut request = CheckoutSessionRequest::new(
        payload.plan_id,
        format!(
            "{}/dashboard?checkout=success&session_id={{CHECKOUT_SESSION_ID}}",
            state.app_url
        ),
        format!("{}/pricing?checkout=cancelled", state.app_url),
    );
    request.client_reference_id = Some(payload.user_id);
    request.customer_id = payload.customer_id.filter(|c| !c.is_empty());

    let session = checkout.create_checkout_session(&request).await.map_err(|e| {
        tracing::error!("Checkout error: {}", e);
        billing_error(&e)
    })?;

    Ok(Json(CreateCheckoutSessionResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Header carrying the shared usage-reporting secret
pub const USAGE_TOKEN_HEADER: &str = "x-usage-token";

/// Report voice minutes used by a customer
///
/// Only trusted callers holding the usage token may report, and only
/// against the plan the customer is actively subscribed to.
pub async fn report_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UsageBody>,
) -> Result<StatusCode, ApiError> {
    let expected = state.usage_token.as_deref().ok_or_else(|| {
        error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Usage reporting is not configured",
            "USAGE_DISABLED",
        )
    })?;
    let provided = headers.get(USAGE_TOKEN_HEADER).and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        tracing::warn!(customer = %payload.customer_id, "Usage report with missing or invalid token");
        return Err(error(StatusCode::UNAUTHORIZED, "Invalid usage token", "UNAUTHORIZED"));
    }

    let checkout = payments(&state)?;

    let subscription = state.subscriptions.get_by_customer(&payload.customer_id).map_err(|e| {
        tracing::error!("Subscription lookup error: {}", e);
        billing_error(&e)
    })?;
    if !subscription.is_some_and(|r| r.is_active() && r.plan_key == payload.plan_id) {
        tracing::warn!(
            customer = %payload.customer_id,
            plan = %payload.plan_id,
            "Usage report does not match an active subscription"
        );
        return Err(error(
            StatusCode::FORBIDDEN,
            "Customer has no active subscription to this plan",
            "PLAN_MISMATCH",
        ));
    }

    checkout
        .report_usage(&payload.plan_id, &payload.customer_id, payload.minutes)
        .await
        .map_err(|e| {
            tracing::error!("Usage reporting error: {}", e);
            billing_error(&e)
        })?;

    Ok(StatusCode::ACCEPTED)
}

/// Subscription status for a user
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SubscriptionRecord>, ApiError> {
    match state.subscriptions.get_by_user(&user_id) {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(error(StatusCode::NOT_FOUND, "No subscription found.", "NOT_FOUND")),
        Err(e) => {
            tracing::error!("Subscription lookup error: {}", e);
            Err(billing_error(&e))
        }
    }
}

/// Stripe webhook handler
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let secret = state.webhook_secret.as_deref().ok_or_else(|| {
        error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Webhooks are not configured",
            "WEBHOOKS_DISABLED",
        )
    })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| error(StatusCode::BAD_REQUEST, "Missing Stripe signature", "MISSING_SIGNATURE"))?;

    let handler = WebhookHandler::new(state.subscriptions.clone());

    let event = handler.parse_event(&body, signature, secret).map_err(|e| {
        tracing::warn!("Webhook signature failed: {}", e);
        error(StatusCode::BAD_REQUEST, "Invalid signature", "INVALID_SIGNATURE")
    })?;

    handler.handle(event).map_err(|e| {
        tracing::error!("Webhook processing error: {}", e);
        error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Webhook processing failed",
            "WEBHOOK_ERROR",
        )
    })?;

    Ok(StatusCode::OK)
}
