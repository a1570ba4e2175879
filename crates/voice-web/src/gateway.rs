//! Client Billing Gateway
//!
//! Bridges the pricing page to Stripe hosted checkout: asks the backend for a
//! checkout session and hands its id to Stripe.js, which redirects the
//! browser. Failures come back as [`GatewayError`] and are never retried.

use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

use crate::api::{self, CheckoutSessionBody};
use crate::session;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Missing publishable key or unprovisioned plan
    #[error("{0}")]
    Config(String),

    /// Stripe.js did not load
    #[error("Payment system unavailable: {0}")]
    SdkUnavailable(String),

    #[error("{message}")]
    Backend { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Stripe.js could not redirect
    #[error("Checkout redirect failed: {0}")]
    Redirect(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

#[wasm_bindgen]
extern "C" {
    type StripeJs;

    #[wasm_bindgen(catch, js_name = Stripe)]
    fn load_stripe(publishable_key: &str) -> Result<StripeJs, JsValue>;

    #[wasm_bindgen(method, js_name = redirectToCheckout)]
    fn redirect_to_checkout(this: &StripeJs, options: &JsValue) -> js_sys::Promise;
}

/// Start hosted checkout for a plan.
///
/// Only returns on failure in practice; on success the browser navigates
/// away to Stripe.
pub async fn redirect_to_checkout(plan_key: &str) -> Result<(), GatewayError> {
    let config = api::fetch_billing_config().await?;

    let publishable_key = config
        .publishable_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| GatewayError::Config("Payments are not configured. Please try again later.".into()))?;

    let product_id = config
        .product_id(plan_key)
        .ok_or_else(|| GatewayError::Config(format!("The {plan_key} plan is not available right now.")))?;

    // Load the SDK before creating a session so a blocked script does not
    // leave an unused session behind
    let stripe = load_stripe(publishable_key).map_err(|e| GatewayError::SdkUnavailable(js_message(&e)))?;

    let user_id = session::user_id();
    let customer_id = session::customer_id();

    let created = api::create_checkout_session(&CheckoutSessionBody {
        plan_id: plan_key,
        product_id,
        user_id: &user_id,
        customer_id: customer_id.as_deref(),
    })
    .await?;

    let options = js_sys::Object::new();
    js_sys::Reflect::set(&options, &"sessionId".into(), &created.session_id.into())
        .map_err(|e| GatewayError::Redirect(js_message(&e)))?;

    let result = JsFuture::from(stripe.redirect_to_checkout(&options))
        .await
        .map_err(|e| GatewayError::Redirect(js_message(&e)))?;

    // Stripe.js resolves with `{ error }` instead of rejecting
    let error = js_sys::Reflect::get(&result, &"error".into()).unwrap_or(JsValue::UNDEFINED);
    if error.is_undefined() || error.is_null() {
        Ok(())
    } else {
        Err(GatewayError::Redirect(js_message(&error)))
    }
}

/// `message` of a JS error, or the value itself when it is a string
fn js_message(value: &JsValue) -> String {
    js_sys::Reflect::get(value, &"message".into())
        .ok()
        .and_then(|m| m.as_string())
        .or_else(|| value.as_string())
        .unwrap_or_else(|| "unknown error".into())
}
