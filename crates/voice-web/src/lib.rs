//! voice-web Frontend
//!
//! Leptos-based WASM frontend: landing page, pricing page with Stripe
//! checkout, and a dashboard shell.

mod api;
mod app;
mod gateway;
mod pages;
mod session;

pub use app::App;
pub use gateway::{GatewayError, redirect_to_checkout};

use wasm_bindgen::prelude::*;

/// WASM entry point
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    leptos::mount::mount_to_body(App);
}
