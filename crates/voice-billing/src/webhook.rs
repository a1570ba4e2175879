//! Stripe Webhook Handling
//!
//! Keeps subscription records in step with the checkout and subscription
//! lifecycle.

use std::sync::Arc;
use stripe::{Event, EventObject, EventType, Webhook};

use crate::error::{BillingError, Result};
use crate::subscription::{SubscriptionRecord, SubscriptionStore};

/// Parsed webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Checkout completed - record the subscription
    CheckoutCompleted {
        session_id: String,
        subscription_id: Option<String>,
        customer_id: Option<String>,
        user_id: Option<String>,
        plan_key: Option<String>,
    },

    /// Subscription status changed
    SubscriptionUpdated { subscription_id: String, status: String },

    /// Subscription ended
    SubscriptionCancelled { subscription_id: String },

    /// Invoice payment failed
    PaymentFailed {
        subscription_id: Option<String>,
        customer_email: Option<String>,
    },

    /// Unhandled event type
    Other { event_type: String },
}

/// Webhook handler
pub struct WebhookHandler<S: SubscriptionStore> {
    store: Arc<S>,
}

impl<S: SubscriptionStore> WebhookHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Verify webhook signature and parse event
    pub fn parse_event(&self, payload: &str, signature: &str, secret: &str) -> Result<Event> {
        Webhook::construct_event(payload, signature, secret)
            .map_err(|e| BillingError::WebhookSignature(e.to_string()))
    }

    /// Process a verified webhook event
    pub fn handle(&self, event: Event) -> Result<WebhookEvent> {
        tracing::info!(event_type = ?event.type_, "Processing Stripe webhook");

        let parsed = parse_webhook_event(&event)?;
        self.apply(&parsed)?;
        Ok(parsed)
    }

    /// Update subscription records for a parsed event
    pub fn apply(&self, event: &WebhookEvent) -> Result<()> {
        match event {
            WebhookEvent::CheckoutCompleted {
                session_id,
                subscription_id,
                customer_id,
                user_id,
                plan_key,
            } => {
                let (Some(subscription_id), Some(plan_key)) = (subscription_id, plan_key) else {
                    tracing::warn!(session_id = %session_id, "Checkout completed without subscription or plan_key; ignoring");
                    return Ok(());
                };

                let mut record = SubscriptionRecord::new(subscription_id.clone(), plan_key.clone());
                record.customer_id = customer_id.clone();
                record.user_id = user_id.clone();
                self.store.save(&record)?;

                tracing::info!(
                    subscription_id = %subscription_id,
                    plan = %plan_key,
                    user_id = ?user_id,
                    "Recorded new subscription"
                );
            }

            WebhookEvent::SubscriptionUpdated { subscription_id, status } => {
                if let Some(mut record) = self.store.get(subscription_id)? {
                    record.set_status(status.clone());
                    self.store.save(&record)?;

                    tracing::info!(
                        subscription_id = %subscription_id,
                        status = %status,
                        active = record.is_active(),
                        "Updated subscription"
                    );
                } else {
                    tracing::debug!(subscription_id = %subscription_id, "Update for unknown subscription");
                }
            }

            WebhookEvent::SubscriptionCancelled { subscription_id } => {
                if let Some(mut record) = self.store.get(subscription_id)? {
                    record.set_status("canceled");
                    self.store.save(&record)?;

                    tracing::info!(subscription_id = %subscription_id, "Subscription cancelled");
                }
            }

            WebhookEvent::PaymentFailed {
                subscription_id,
                customer_email,
            } => {
                tracing::warn!(
                    subscription_id = ?subscription_id,
                    email = ?customer_email,
                    "Payment failed"
                );
            }

            WebhookEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
            }
        }

        Ok(())
    }
}

/// Parse Stripe event into our event type
fn parse_webhook_event(event: &Event) -> Result<WebhookEvent> {
    match event.type_ {
        EventType::CheckoutSessionCompleted => {
            if let EventObject::CheckoutSession(session) = &event.data.object {
                Ok(WebhookEvent::CheckoutCompleted {
                    session_id: session.id.to_string(),
                    subscription_id: session.subscription.as_ref().map(|s| s.id().to_string()),
                    customer_id: session.customer.as_ref().map(|c| c.id().to_string()),
                    user_id: session.client_reference_id.clone(),
                    plan_key: session.metadata.as_ref().and_then(|m| m.get("plan_key")).cloned(),
                })
            } else {
                Err(BillingError::WebhookParse("Invalid checkout session data".into()))
            }
        }

        EventType::CustomerSubscriptionUpdated => {
            if let EventObject::Subscription(sub) = &event.data.object {
                Ok(WebhookEvent::SubscriptionUpdated {
                    subscription_id: sub.id.to_string(),
                    status: sub.status.to_string(),
                })
            } else {
                Err(BillingError::WebhookParse("Invalid subscription data".into()))
            }
        }

        EventType::CustomerSubscriptionDeleted => {
            if let EventObject::Subscription(sub) = &event.data.object {
                Ok(WebhookEvent::SubscriptionCancelled {
                    subscription_id: sub.id.to_string(),
                })
            } else {
                Err(BillingError::WebhookParse("Invalid subscription data".into()))
            }
        }

        EventType::InvoicePaymentFailed => {
            if let EventObject::Invoice(invoice) = &event.data.object {
                Ok(WebhookEvent::PaymentFailed {
                    subscription_id: invoice.subscription.as_ref().map(|s| s.id().to_string()),
                    customer_email: invoice.customer_email.clone(),
                })
            } else {
                Err(BillingError::WebhookParse("Invalid invoice data".into()))
            }
        }

        _ => Ok(WebhookEvent::Other {
            event_type: format!("{:?}", event.type_),
        }),
    }
}
