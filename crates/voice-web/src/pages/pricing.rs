//! Pricing Page

use leptos::prelude::*;
use leptos_router::hooks::use_query_map;

use crate::api::{self, Plan};
use crate::gateway::{self, GatewayError};

/// `$99` for whole dollars, `$0.10` otherwise
fn format_price(cents: i64) -> String {
    if cents % 100 == 0 {
        format!("${}", cents / 100)
    } else {
        format!("${}.{:02}", cents / 100, cents % 100)
    }
}

fn format_minutes(minutes: u64) -> String {
    let digits = minutes.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn plan_card(
    plan: Plan,
    pending: ReadSignal<Option<String>>,
    subscribe: impl Fn(String) + Copy + Send + Sync + 'static,
) -> impl IntoView {
    let class = if plan.popular { "plan featured" } else { "plan" };
    let key = plan.id.clone();
    let busy_key = plan.id.clone();
    let is_busy = move || pending.get().is_some_and(|k| k == busy_key);

    view! {
        <div class=class>
            {plan.popular.then(|| view! { <span class="badge">"Popular"</span> })}
            <h2>{plan.name}</h2>
            <div class="price">{format_price(plan.price_cents)}<span>{format!("/{}", plan.interval)}</span></div>
            <p class="included">{format!("{} minutes included", format_minutes(plan.included_minutes))}</p>
            {plan.overage_rate_cents.map(|rate| view! {
                <p class="overage">{format!("then {} / minute", format_price(rate))}</p>
            })}
            <ul>
                {plan.features.into_iter().map(|f| view! { <li>{f}</li> }).collect_view()}
            </ul>
            <button
                class="btn btn-primary"
                disabled=move || pending.get().is_some()
                on:click=move |_| subscribe(key.clone())
            >
                {move || if is_busy() { "Redirecting…" } else { "Subscribe" }}
            </button>
        </div>
    }
}

#[component]
pub fn PricingPage() -> impl IntoView {
    let (plans, set_plans) = signal(None::<Result<Vec<Plan>, GatewayError>>);
    let (error, set_error) = signal(None::<String>);
    let (pending, set_pending) = signal(None::<String>);

    let query = use_query_map();
    let cancelled = move || query.with(|q| q.get("checkout").is_some_and(|v| v == "cancelled"));

    leptos::task::spawn_local(async move {
        set_plans.set(Some(api::fetch_plans().await));
    });

    let subscribe = move |plan_key: String| {
        set_error.set(None);
        set_pending.set(Some(plan_key.clone()));
        leptos::task::spawn_local(async move {
            if let Err(e) = gateway::redirect_to_checkout(&plan_key).await {
                set_error.set(Some(e.to_string()));
            }
            set_pending.set(None);
        });
    };

    view! {
        <div class="pricing">
            <h1>"Pricing"</h1>
            <p class="subtitle">"Included minutes every month, simple overage after that"</p>

            <Show when=cancelled>
                <div class="alert alert-info">"Checkout cancelled. You have not been charged."</div>
            </Show>

            <Show when=move || error.get().is_some()>
                <div class="alert alert-error" role="alert">
                    <span>{move || error.get().unwrap_or_default()}</span>
                    <button class="dismiss" aria-label="Dismiss" on:click=move |_| set_error.set(None)>
                        "×"
                    </button>
                </div>
            </Show>

            <div class="plans">
                {move || match plans.get() {
                    None => view! { <p class="loading">"Loading plans…"</p> }.into_any(),
                    Some(Err(e)) => view! { <p class="error">{e.to_string()}</p> }.into_any(),
                    Some(Ok(plans)) => plans
                        .into_iter()
                        .map(|plan| plan_card(plan, pending, subscribe))
                        .collect_view()
                        .into_any(),
                }}
            </div>
        </div>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(9900), "$99");
        assert_eq!(format_price(10), "$0.10");
        assert_eq!(format_price(29950), "$299.50");
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(1000), "1,000");
        assert_eq!(format_minutes(20000), "20,000");
        assert_eq!(format_minutes(500), "500");
    }
}
