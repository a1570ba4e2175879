//! Voice AI billing server
//!
//! Axum-based server providing the billing REST API and serving the WASM
//! frontend. The Stripe catalog is reconciled once at startup; a failed
//! reconciliation stops the server.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_billing::{
    BillingApi, BillingConfig, CheckoutSessionBuilder, MemorySubscriptionStore, PlanCatalog, StripeBillingApi,
    reconcile,
};

use crate::handlers::{
    billing_config, create_checkout_session, get_subscription, health_check, list_plans, report_usage,
    stripe_webhook,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let catalog = Arc::new(PlanCatalog::default());
    let app_url = std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".into());
    let usage_token = std::env::var("USAGE_API_TOKEN").ok().filter(|v| !v.trim().is_empty());
    if usage_token.is_none() {
        tracing::warn!("⚠ USAGE_API_TOKEN not set - usage reporting disabled");
    }

    // Initialize payments
    let (checkout, publishable_key, webhook_secret) = match BillingConfig::from_env() {
        Ok(config) => {
            let api: Arc<dyn BillingApi> = Arc::new(StripeBillingApi::from_config(&config)?);
            let provisioned = reconcile(&catalog, api.as_ref()).await?;
            tracing::info!("✓ Stripe configured, {} plans provisioned", provisioned.len());

            if config.publishable_key.is_none() {
                tracing::warn!("⚠ STRIPE_PUBLISHABLE_KEY not set - browser checkout will report a configuration error");
            }
            if config.webhook_secret.is_none() {
                tracing::warn!("⚠ STRIPE_WEBHOOK_SECRET not set - webhooks disabled");
            }

            let builder = CheckoutSessionBuilder::new(catalog.clone(), Arc::new(provisioned), api);
            (Some(builder), config.publishable_key, config.webhook_secret)
        }
        Err(e) => {
            tracing::warn!("⚠ Stripe not configured - payments disabled ({})", e);
            tracing::warn!("  Set STRIPE_SECRET_KEY and STRIPE_PUBLISHABLE_KEY in .env");
            (None, None, None)
        }
    };

    let state = AppState {
        catalog,
        checkout,
        subscriptions: Arc::new(MemorySubscriptionStore::new()),
        publishable_key,
        webhook_secret,
        usage_token,
        app_url,
    };

    let app = app(state).fallback_service(ServeDir::new("static"));

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("voice-server running on http://{}", addr);
    tracing::info!("  GET  /health                      - Health check");
    tracing::info!("  GET  /api/plans                   - Plan catalog");
    tracing::info!("  GET  /api/billing/config          - Publishable key and plan products");
    tracing::info!("  POST /api/create-checkout-session - Create Stripe checkout");
    tracing::info!("  POST /api/usage                   - Report voice minutes (x-usage-token)");
    tracing::info!("  GET  /api/subscriptions/{{user}}   - Subscription status");

    axum::serve(listener, app).await?;

    Ok(())
}

/// API routes
fn app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/plans", get(list_plans))
        .route("/api/billing/config", get(billing_config))
        .route("/api/create-checkout-session", post(create_checkout_session))
        .route("/api/usage", post(report_usage))
        .route("/api/subscriptions/{user_id}", get(get_subscription))
        .route("/webhook/stripe", post(stripe_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
