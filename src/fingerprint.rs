//! Content fingerprints used as idempotency keys for Jenkins builds
//!
//! A fingerprint is a SHA-256 digest encoded as URL-safe base64. Key/value
//! payloads are fed key first, then value, in lexicographic key order, so the
//! result never depends on map iteration order.

use aws_lc_rs::digest::{Context, SHA256};
use base64::{engine::general_purpose::URL_SAFE, Engine};

/// Fingerprint an unordered key/value payload (config map or secret data).
pub fn fingerprint_map<I, K, V>(entries: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut pairs: Vec<(K, V)> = entries.into_iter().collect();
    pairs.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));

    let mut ctx = Context::new(&SHA256);
    for (key, value) in &pairs {
        ctx.update(key.as_ref());
        ctx.update(value.as_ref());
    }
    URL_SAFE.encode(ctx.finish().as_ref())
}

/// Fingerprint an ordered sequence of fields, fed in the order given.
pub fn fingerprint_fields<I, F>(fields: I) -> String
where
    I: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let mut ctx = Context::new(&SHA256);
    for field in fields {
        ctx.update(field.as_ref());
    }
    URL_SAFE.encode(ctx.finish().as_ref())
}

/// Fingerprint a single opaque payload such as a script body.
pub fn fingerprint_bytes(payload: impl AsRef<[u8]>) -> String {
    fingerprint_fields([payload])
}
