use hmac::{Hmac, Mac};
use nanoid::nanoid;

use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "X-Stampsync-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Stampsync-Timestamp";

/// Signed callbacks older or newer than this are refused.
pub const CALLBACK_TOLERANCE_SECS: i64 = 300;

pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, nanoid!(16))
}

fn mac(secret: &str) -> Hmac<Sha256> {
    // HMAC-SHA256 accepts any key length, so this cannot fail
    Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key length")
}

/// Sign a callback body with HMAC-SHA256 over `"{timestamp}.{body}"`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac = mac(secret);
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    format!("sha256={:x}", mac.finalize().into_bytes())
}

pub fn verify_signature(secret: &str, timestamp: i64, body: &str, signature: &str) -> bool {
    let expected = sign_payload(secret, timestamp, body);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

pub fn timestamp_is_fresh(timestamp: i64, now: i64) -> bool {
    (now - timestamp).abs() <= CALLBACK_TOLERANCE_SECS
}

/// Per-pass token a device presents as `ApplePass <token>` when it
/// (un)registers. Derived so the pass builder and this service agree
/// without sharing a table.
pub fn pass_auth_token(secret: &str, customer_id: &str) -> String {
    let mut mac = mac(secret);
    mac.update(b"pass:");
    mac.update(customer_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_pass_token(secret: &str, customer_id: &str, presented: &str) -> bool {
    let expected = pass_auth_token(secret, customer_id);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), presented.as_bytes()).into()
}
