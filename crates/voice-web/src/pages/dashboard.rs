//! Dashboard Page

use leptos::prelude::*;
use leptos_router::hooks::use_query_map;

use crate::api::{self, Subscription};
use crate::gateway::GatewayError;
use crate::session;

#[component]
pub fn DashboardPage() -> impl IntoView {
    let (subscription, set_subscription) = signal(None::<Result<Option<Subscription>, GatewayError>>);

    let query = use_query_map();
    let checkout_succeeded = move || query.with(|q| q.get("checkout").is_some_and(|v| v == "success"));

    leptos::task::spawn_local(async move {
        let result = api::fetch_subscription(&session::user_id()).await;
        if let Ok(Some(sub)) = &result {
            if let Some(customer_id) = &sub.customer_id {
                session::remember_customer_id(customer_id);
            }
        }
        set_subscription.set(Some(result));
    });

    view! {
        <div class="dashboard">
            <h1>"Dashboard"</h1>

            <Show when=checkout_succeeded>
                <div class="alert alert-success">
                    "Thanks for subscribing! Your plan will be active in a moment."
                </div>
            </Show>

            {move || match subscription.get() {
                None => view! { <p class="loading">"Loading subscription…"</p> }.into_any(),
                Some(Err(e)) => view! { <p class="error">{e.to_string()}</p> }.into_any(),
                Some(Ok(None)) => view! {
                    <p>"No active plan. " <a href="/pricing">"Choose a plan"</a></p>
                }
                .into_any(),
                Some(Ok(Some(sub))) => {
                    let status_class = if sub.is_active() { "status active" } else { "status inactive" };
                    view! {
                        <div class="subscription">
                            <h2>{format!("{} plan", sub.plan_key)}</h2>
                            <span class=status_class>{sub.status.clone()}</span>
                            <p class="since">{format!("Since {}", sub.created_at.format("%B %-d, %Y"))}</p>
                        </div>
                    }
                    .into_any()
                }
            }}
        </div>
    }
}
