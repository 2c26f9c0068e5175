//! Signature verification for instruction sources and context providers.
//!
//! Tags are HMAC-SHA256 over the raw content under a per-source shared key,
//! transported as base64. Comparison is constant-time via recomputation and
//! byte equality on the fixed-width digest.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the base64 HMAC-SHA256 tag for `content` under `key`.
pub fn sign(key: &[u8], content: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(content);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Verify a base64 tag. Returns false for malformed base64 rather than
/// erroring, so a garbage signature is just an invalid one.
pub fn verify(key: &[u8], content: &[u8], tag_b64: &str) -> bool {
    let tag = match BASE64.decode(tag_b64.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(content);
    mac.verify_slice(&tag).is_ok()
}
