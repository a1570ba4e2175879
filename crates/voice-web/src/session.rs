//! Browser-local identity
//!
//! There is no login yet; a generated user id is kept in `localStorage` so
//! checkout and the dashboard agree on who the visitor is.

const USER_ID_KEY: &str = "voice_user_id";
const CUSTOMER_ID_KEY: &str = "voice_customer_id";

fn storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

/// Stable id for this browser, created on first use
pub fn user_id() -> String {
    let storage = storage();

    if let Some(id) = storage.as_ref().and_then(|s| s.get_item(USER_ID_KEY).ok().flatten()) {
        return id;
    }

    let id = new_user_id(chrono::Utc::now().timestamp_millis(), js_sys::Math::random());
    if let Some(s) = storage {
        let _ = s.set_item(USER_ID_KEY, &id);
    }
    id
}

/// Stripe customer remembered from an earlier subscription
pub fn customer_id() -> Option<String> {
    storage()
        .and_then(|s| s.get_item(CUSTOMER_ID_KEY).ok().flatten())
        .filter(|id| !id.is_empty())
}

pub fn remember_customer_id(customer_id: &str) {
    if let Some(s) = storage() {
        let _ = s.set_item(CUSTOMER_ID_KEY, customer_id);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn new_user_id(millis: i64, random: f64) -> String {
    let suffix = (random * f64::from(u32::MAX)) as u32;
    format!("user_{millis:x}{suffix:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_id_format() {
        assert_eq!(new_user_id(0x1234, 0.0), "user_123400000000");
        let id = new_user_id(1_760_000_000_000, 0.5);
        assert!(id.starts_with("user_"));
        assert_ne!(id, new_user_id(1_760_000_000_000, 0.25));
    }
}
