use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::TradingError;
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

/// Query string with keys in sorted order (`a=1&b=2`)
pub fn query_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Signature payload: method + path[?query] + body + nonce
pub fn signature_payload(
    method: &str,
    path: &str,
    params: &BTreeMap<String, String>,
    body: &str,
    nonce: i64,
) -> String {
    let path_with_params = if params.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query_string(params))
    };
    format!("{}{}{}{}", method, path_with_params, body, nonce)
}

/// Hex-encoded HMAC-SHA256 of `payload`
pub fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TradingError::Gateway(format!("HMAC error: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Short fingerprint of a signing secret, safe to log
pub fn key_fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(&digest[..4])
}

/// Millisecond nonces, strictly increasing per generator
#[derive(Debug, Default)]
pub struct NonceGenerator {
    last: AtomicI64,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_sorted() {
        let mut params = BTreeMap::new();
        params.insert("timeframe".to_string(), "15m".to_string());
        params.insert("count".to_string(), "200".to_string());
        params.insert("instrument_name".to_string(), "BTC_USDT".to_string());

        assert_eq!(
            query_string(&params),
            "count=200&instrument_name=BTC_USDT&timeframe=15m"
        );
    }

    #[test]
    fn test_signature_payload_layout() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());

        let payload = signature_payload("GET", "/public/get-ticker", &params, "", 1700000000000);
        assert_eq!(payload, "GET/public/get-ticker?a=1&b=21700000000000");

        let body = r#"{"order_id":"42"}"#;
        let payload = signature_payload("POST", "/private/cancel-order", &BTreeMap::new(), body, 5);
        assert_eq!(payload, r#"POST/private/cancel-order{"order_id":"42"}5"#);
    }

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        let signature = sign("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_nonce_strictly_increasing() {
        let nonces = NonceGenerator::new();
        let mut previous = nonces.next();
        for _ in 0..1000 {
            let next = nonces.next();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_key_fingerprint_hides_secret() {
        let fingerprint = key_fingerprint("my-secret");
        assert_eq!(fingerprint.len(), 8);
        assert!(!fingerprint.contains("secret"));
    }
}
