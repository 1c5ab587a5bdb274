// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request-signing primitives shared by the marketplace adapters.
//!
//! Parameters are carried as a [`Params`] map, which keeps them sorted by
//! key; every platform here signs over its parameters in byte order of the
//! key, so canonicalisation is just iteration.

use super::error::AdapterError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use md5::{Digest as _, Md5};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt::Write as _;

type HmacSha256 = Hmac<Sha256>;

/// Query/form parameters, sorted by key.
pub type Params = BTreeMap<String, String>;

fn hmac_sha256(secret: &str, message: &str) -> Result<Vec<u8>, AdapterError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AdapterError::Config(format!("invalid signing secret: {e}")))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Lowercase hex HMAC-SHA256.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String, AdapterError> {
    Ok(hex::encode(hmac_sha256(secret, message)?))
}

/// Standard base64 HMAC-SHA256.
pub fn hmac_sha256_base64(secret: &str, message: &str) -> Result<String, AdapterError> {
    Ok(BASE64.encode(hmac_sha256(secret, message)?))
}

#[must_use]
pub fn sha256_hex(message: &str) -> String {
    hex::encode(Sha256::digest(message.as_bytes()))
}

#[must_use]
pub fn md5_upper_hex(message: &str) -> String {
    hex::encode_upper(Md5::digest(message.as_bytes()))
}

/// `k1=v1&k2=v2` without any escaping.
#[must_use]
pub fn join_pairs(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// `k1v1k2v2`
#[must_use]
pub fn concat_pairs(params: &Params) -> String {
    params.iter().fold(String::new(), |mut out, (k, v)| {
        out.push_str(k);
        out.push_str(v);
        out
    })
}

/// `k1=v1&k2=v2` with RFC 3986 escaping of keys and values.
#[must_use]
pub fn canonical_query(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Escape everything except `A-Z a-z 0-9 - _ . ~`.
#[must_use]
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// Compact JSON with object keys in sorted order.
///
/// `serde_json::Map` is ordered by key unless the `preserve_order` feature
/// is enabled, which this crate does not do.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_digest_vectors() {
        assert_eq!(
            hmac_sha256_hex("secret", "hello").unwrap(),
            "88aab3ede8d3adf94d26ab90d3bafd4a2083070c3bcce9c014ee04a443847c0b"
        );
        assert_eq!(
            hmac_sha256_base64("secret", "hello").unwrap(),
            "iKqz7ejTrflNJquQ07r9SiCDBww7zOnAFO4EpEOEfAs="
        );
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(md5_upper_hex("hello"), "5D41402ABC4B2A76B9719D911017C592");
    }

    #[test]
    fn test_pairs_are_sorted_by_key() {
        let mut params = Params::new();
        params.insert("timestamp".into(), "1700000000".into());
        params.insert("app_key".into(), "k".into());
        params.insert("shop_id".into(), "7".into());
        assert_eq!(join_pairs(&params), "app_key=k&shop_id=7&timestamp=1700000000");
        assert_eq!(concat_pairs(&params), "app_keykshop_id7timestamp1700000000");
    }

    #[test]
    fn test_percent_encoding_keeps_unreserved() {
        assert_eq!(percent_encode("a b/c:d~e_f.g-h*"), "a%20b%2Fc%3Ad~e_f.g-h%2A");

        let mut params = Params::new();
        params.insert("Timestamp".into(), "2024-01-02T03:04:05Z".into());
        params.insert("Action".into(), "ListOrders".into());
        assert_eq!(canonical_query(&params), "Action=ListOrders&Timestamp=2024-01-02T03%3A04%3A05Z");
    }

    #[test]
    fn test_canonical_json_sorts_keys_compactly() {
        let body = json!({"stock": 3, "sku_id": "A", "nested": {"b": 1, "a": [1, 2]}});
        assert_eq!(canonical_json(&body), r#"{"nested":{"a":[1,2],"b":1},"sku_id":"A","stock":3}"#);
    }
}
