use rpg_common::Secret;
use sha2::{Digest, Sha512};

/// Midtrans webhook signature: `SHA-512(order_id || status_code || gross_amount || server_key)`, lowercase hex.
pub fn webhook_signature(order_id: &str, status_code: &str, gross_amount: &str, server_key: &Secret<String>) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.reveal().as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-shape comparison of the advertised signature against the recomputed one.
pub fn verify_webhook_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &Secret<String>,
    advertised: &str,
) -> bool {
    let expected = webhook_signature(order_id, status_code, gross_amount, server_key);
    // Hex compare of equal-length digests; a length mismatch is an immediate reject.
    expected.len() == advertised.len()
        && expected
            .bytes()
            .zip(advertised.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b.to_ascii_lowercase()))
            == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signature_matches_known_vector() {
        let key = Secret::new("server-key-123".to_string());
        let sig = webhook_signature("RP-1", "200", "104000.00", &key);
        assert_eq!(sig.len(), 128);
        assert!(verify_webhook_signature("RP-1", "200", "104000.00", &key, &sig));
        assert!(verify_webhook_signature("RP-1", "200", "104000.00", &key, &sig.to_ascii_uppercase()));
    }

    #[test]
    fn tampered_fields_fail() {
        let key = Secret::new("server-key-123".to_string());
        let sig = webhook_signature("RP-1", "200", "104000.00", &key);
        assert!(!verify_webhook_signature("RP-1", "200", "999999.00", &key, &sig));
        assert!(!verify_webhook_signature("RP-2", "200", "104000.00", &key, &sig));
        assert!(!verify_webhook_signature("RP-1", "200", "104000.00", &key, "deadbeef"));
        let other_key = Secret::new("another-key".to_string());
        assert!(!verify_webhook_signature("RP-1", "200", "104000.00", &other_key, &sig));
    }
}
