//! Home Page

use leptos::prelude::*;

#[component]
pub fn HomePage() -> impl IntoView {
    view! {
        <div class="home">
            <header class="hero">
                <h1>"Voice AI"</h1>
                <p class="tagline">"Phone agents that answer every call, billed by the minute"</p>
                <div class="cta">
                    <a href="/pricing" class="btn btn-primary">"View Plans"</a>
                    <a href="/dashboard" class="btn">"Dashboard"</a>
                </div>
            </header>

            <section class="features">
                <div class="feature">
                    <h3>"📞 Always on"</h3>
                    <p>"Inbound and outbound calls handled around the clock."</p>
                </div>
                <div class="feature">
                    <h3>"⏱️ Fair pricing"</h3>
                    <p>"Every plan includes minutes. Go over and pay only for what you use."</p>
                </div>
                <div class="feature">
                    <h3>"🔌 Integrates"</h3>
                    <p>"Connect your CRM and calendar in minutes."</p>
                </div>
            </section>
        </div>
    }
}
