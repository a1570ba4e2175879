//! Billing Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BillingError>;

/// Billing-related errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// Plan key is not part of the catalog
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// A lookup or create call failed while provisioning a plan
    #[error("Provisioning failed for plan '{plan}' while {step}: {source}")]
    Provisioning {
        plan: String,
        step: &'static str,
        #[source]
        source: Box<BillingError>,
    },

    /// Checkout attempted before reconciliation produced remote ids
    #[error("Plan not provisioned: {0}")]
    PlanNotProvisioned(String),

    /// The billing API rejected checkout session creation
    #[error("Checkout creation failed for plan '{plan}': {source}")]
    CheckoutCreation {
        plan: String,
        #[source]
        source: Box<BillingError>,
    },

    /// Billing API returned an error response
    #[error("Billing API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure talking to the billing API
    #[error("HTTP error: {0}")]
    Http(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl BillingError {
    pub(crate) fn provisioning<'a>(plan: &'a str, step: &'static str) -> impl FnOnce(BillingError) -> BillingError + 'a {
        move |source| BillingError::Provisioning {
            plan: plan.to_string(),
            step,
            source: Box::new(source),
        }
    }

    /// Check if this error is retryable
    ///
    /// Nothing in this crate retries; callers use this to pick a status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Http(_) | BillingError::Storage(_) => true,
            BillingError::Api { status, .. } => *status == 429 || *status >= 500,
            BillingError::Provisioning { source, .. }
            | BillingError::CheckoutCreation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            BillingError::UnknownPlan(_) => "The selected plan does not exist.",
            BillingError::PlanNotProvisioned(_) => "This plan is not available for purchase yet.",
            BillingError::CheckoutCreation { .. } | BillingError::Api { .. } | BillingError::Http(_) => {
                "Payment processing failed. Please try again."
            }
            BillingError::Provisioning { .. } => "Billing setup is incomplete.",
            BillingError::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(request) => BillingError::Api {
                status: request.http_status,
                message: request.message.unwrap_or_else(|| "Request failed".to_string()),
            },
            other => BillingError::Http(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_wraps_cause() {
        let err = BillingError::provisioning("essential", "creating meter")(BillingError::Api {
            status: 500,
            message: "boom".into(),
        });
        assert!(err.to_string().contains("essential"));
        assert!(err.to_string().contains("boom"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_not_retryable() {
        let err = BillingError::Api { status: 400, message: "bad".into() };
        assert!(!err.is_retryable());
        assert!(!BillingError::UnknownPlan("x".into()).is_retryable());
    }

    #[test]
    fn test_stripe_timeout_is_retryable() {
        let err = BillingError::from(stripe::StripeError::Timeout);
        assert!(matches!(err, BillingError::Http(_)));
        assert!(err.is_retryable());
    }
}
