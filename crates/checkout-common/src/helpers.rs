//! Common helper functions shared by the gateway and the agents.

use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;

use crate::protocol::MAX_SESSION_ID_BYTES;

pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Parse an environment variable, falling back to `default` when unset or
/// unparseable.
pub fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(name, default.as_secs()))
}

pub fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(name, default.as_millis() as u64))
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a kiosk session id: `device_{unixMillis}_{9 base36 chars}`.
pub fn new_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("device_{}_{}", now_ms(), suffix)
}

/// Session and device ids are opaque but must be safe to embed in a store
/// key and a URL query string.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_BYTES
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

/// Frames and detector images travel as `data:image/<type>;base64,<payload>`.
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Split an image data URL into its MIME type and decoded bytes.
pub fn decode_data_url(data_url: &str) -> Option<(String, Vec<u8>)> {
    let rest = data_url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64")?;
    if !mime.starts_with("image/") {
        return None;
    }
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    Some((mime.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_id_shape() {
        let id = new_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "device");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(is_valid_session_id(&id));
    }

    #[test]
    fn test_new_session_ids_differ() {
        assert_ne!(new_session_id(), new_session_id());
    }

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("device_123"));
        assert!(is_valid_session_id("a.b-c_d"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("has space"));
        assert!(!is_valid_session_id("semi:colon"));
        assert!(!is_valid_session_id(&"x".repeat(MAX_SESSION_ID_BYTES + 1)));
    }

    #[test]
    fn test_env_parse_falls_back() {
        assert_eq!(env_parse("CHECKOUT_TEST_UNSET_VARIABLE", 42u32), 42);
        assert!(!env_bool("CHECKOUT_TEST_UNSET_VARIABLE", false));
        assert_eq!(
            env_secs("CHECKOUT_TEST_UNSET_VARIABLE", Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_data_url_encoding() {
        let url = encode_data_url("image/png", &[1, 2, 3]);
        assert_eq!(url, "data:image/png;base64,AQID");
        assert_eq!(decode_data_url(&url), Some(("image/png".to_string(), vec![1, 2, 3])));
        assert_eq!(
            decode_data_url("data:image/png;base64,aGVsbG8="),
            Some(("image/png".to_string(), b"hello".to_vec()))
        );
    }

    #[test]
    fn test_decode_data_url_rejects_non_images() {
        assert!(decode_data_url("not a data url").is_none());
        assert!(decode_data_url("data:text/plain;base64,aGVsbG8=").is_none());
        assert!(decode_data_url("data:image/png,raw").is_none());
        assert!(decode_data_url("image/png;base64,aGVsbG8=").is_none());
        assert!(decode_data_url("data:image/png;base64,!!!").is_none());
    }
}
