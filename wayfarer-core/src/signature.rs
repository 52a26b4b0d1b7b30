use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC takes keys of any length, so this never returns early.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature. An empty secret never verifies.
pub fn verify_hex(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() || signature.trim().is_empty() {
        return false;
    }
    let expected = sign_hex(secret, payload);
    let provided = signature.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Checkout signature: HMAC over `"{order_id}|{payment_id}"` with the API key secret.
pub fn checkout_payload(order_id: &str, payment_id: &str) -> String {
    format!("{}|{}", order_id, payment_id)
}
