//! `FeedMd5` verification.
//!
//! `FeedMd5` is the base64-encoded MD5 of the canonical serialization of
//! the post-delta feed data. The digest primitive itself is a standard
//! algorithm; this module only fixes the canonical serialization (compact,
//! sorted-key JSON) and the base64 framing around it.

use serde_json::Value;

/// Canonicalizes `value` the same way on every call: `serde_json`'s
/// `Map` is a `BTreeMap` by default (no `preserve_order` feature enabled
/// here), so object keys already serialize in sorted order; this function
/// exists to name that property and to produce the compact representation
/// that is fed to MD5.
fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("serde_json::Value serialization cannot fail")
}

/// Computes the base64-encoded MD5 digest of `value`'s canonical encoding.
pub fn feed_md5(value: &Value) -> String {
    let digest = md5::compute(canonical_bytes(value));
    base64_encode(&digest.0)
}

/// Verifies `expected` (the server-declared `FeedMd5`) against `value`.
pub fn verify(value: &Value, expected: &str) -> bool {
    feed_md5(value) == expected
}

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Minimal standard base64 encoder (with padding). The crate avoids taking
/// on a dedicated `base64` dependency for sixteen bytes of output; this is
/// plain, well-trodden logic with no protocol-specific behavior.
fn base64_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);

        let n = ((b0 as u32) << 16) | ((b1 as u32) << 8) | (b2 as u32);
        out.push(BASE64_ALPHABET[(n >> 18 & 0x3f) as usize] as char);
        out.push(BASE64_ALPHABET[(n >> 12 & 0x3f) as usize] as char);
        out.push(if chunk.len() > 1 {
            BASE64_ALPHABET[(n >> 6 & 0x3f) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            BASE64_ALPHABET[(n & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}
