//! Signature helpers shared by the provider gateways.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `payload` under `secret`.
pub fn hmac_hex(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature against the expected HMAC.
pub fn verify_hmac_hex(secret: &str, payload: &str, signature: &str) -> bool {
    let Ok(signature) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

/// Constant-time byte comparison for shared-secret credentials.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let sig = hmac_hex("secret", "payload");
        assert!(verify_hmac_hex("secret", "payload", &sig));
        assert!(!verify_hmac_hex("secret", "tampered", &sig));
        assert!(!verify_hmac_hex("other", "payload", &sig));
    }

    #[test]
    fn test_malformed_hex_rejected() {
        assert!(!verify_hmac_hex("secret", "payload", "not-hex"));
        assert!(!verify_hmac_hex("secret", "payload", ""));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
