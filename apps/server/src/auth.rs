//! Telegram Mini App authentication. Every client call carries the Mini App
//! initData blob in the Authorization header; we verify its HMAC against the
//! bot token and pull the user out of it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::models::TelegramUser;

type HmacSha256 = Hmac<Sha256>;

/// initData older than this is rejected (replay protection).
const MAX_AUTH_AGE_SECS: i64 = 86400;

/// Validate initData and extract the user.
/// See: https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app
pub fn validate_init_data(init_data: &str, bot_token: &str) -> Option<TelegramUser> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let hash = params.get("hash")?;

    if let Some(auth_date) = params.get("auth_date").and_then(|s| s.parse::<i64>().ok()) {
        let age = chrono::Utc::now().timestamp() - auth_date;
        if age > MAX_AUTH_AGE_SECS {
            tracing::warn!("initData expired: auth_date={}, age={}s", auth_date, age);
            return None;
        }
    }

    // data-check-string: sorted key=value pairs, hash excluded
    let data_check_string: String = params
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    if compute_hash(&data_check_string, bot_token) != *hash {
        tracing::warn!("initData hash mismatch");
        return None;
    }

    let user_json = params.get("user")?;
    serde_json::from_str::<TelegramUser>(user_json).ok()
}

/// HMAC-SHA256(HMAC-SHA256("WebAppData", bot_token), data_check_string), hex.
fn compute_hash(data_check_string: &str, bot_token: &str) -> String {
    let mut secret_mac =
        HmacSha256::new_from_slice(b"WebAppData").expect("HMAC can take key of any size");
    secret_mac.update(bot_token.as_bytes());
    let secret_key = secret_mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key).expect("HMAC can take key of any size");
    mac.update(data_check_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Extract the user from an `Authorization: tma <initData>` header.
pub fn extract_user_from_header(auth_header: &str, bot_token: &str) -> Option<TelegramUser> {
    let init_data = auth_header.strip_prefix("tma ")?;
    validate_init_data(init_data, bot_token)
}

pub fn is_admin(user: &TelegramUser, admin_tg_id: i64) -> bool {
    user.id == admin_tg_id
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "12345:test-token";

    /// Build a signed initData string the way Telegram would.
    fn signed_init_data(user_json: &str, auth_date: i64) -> String {
        let pairs = vec![
            ("auth_date".to_string(), auth_date.to_string()),
            ("user".to_string(), user_json.to_string()),
        ];
        let check_string = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        let hash = compute_hash(&check_string, TOKEN);

        let mut encoded = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            encoded.append_pair(k, v);
        }
        encoded.append_pair("hash", &hash);
        encoded.finish()
    }

    #[test]
    fn valid_init_data_yields_the_user() {
        let now = chrono::Utc::now().timestamp();
        let init = signed_init_data(r#"{"id":42,"first_name":"Анна","username":"anna"}"#, now);
        let user = validate_init_data(&init, TOKEN).unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.username.as_deref(), Some("anna"));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let init = signed_init_data(r#"{"id":42,"first_name":"Анна"}"#, now);
        let tampered = init.replace("42", "43");
        assert!(validate_init_data(&tampered, TOKEN).is_none());
    }

    #[test]
    fn wrong_bot_token_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let init = signed_init_data(r#"{"id":42,"first_name":"Анна"}"#, now);
        assert!(validate_init_data(&init, "other:token").is_none());
    }

    #[test]
    fn stale_auth_date_is_rejected() {
        let old = chrono::Utc::now().timestamp() - MAX_AUTH_AGE_SECS - 60;
        let init = signed_init_data(r#"{"id":42,"first_name":"Анна"}"#, old);
        assert!(validate_init_data(&init, TOKEN).is_none());
    }

    #[test]
    fn header_must_carry_the_tma_scheme() {
        let now = chrono::Utc::now().timestamp();
        let init = signed_init_data(r#"{"id":42,"first_name":"Анна"}"#, now);
        assert!(extract_user_from_header(&format!("tma {}", init), TOKEN).is_some());
        assert!(extract_user_from_header(&format!("Bearer {}", init), TOKEN).is_none());
    }

    #[test]
    fn admin_check_is_exact_id_match() {
        let user = TelegramUser {
            id: 7,
            first_name: "Оп".into(),
            last_name: None,
            username: None,
        };
        assert!(is_admin(&user, 7));
        assert!(!is_admin(&user, 8));
    }
}
