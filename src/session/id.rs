//! Session id generation
//!
//! Ids are 128-bit random values rendered as 32 lowercase hex characters
//! (UUID v4 layout). Generation never fails: if the OS entropy source is
//! unavailable, bytes are derived from a SHA-256 of the clock, the process
//! id and a process-wide counter.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Builder;

/// Longest token accepted from a client
const MAX_ID_LEN: usize = 128;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Produce a new, practically unique session id
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    if let Err(e) = getrandom::fill(&mut bytes) {
        tracing::warn!("OS entropy unavailable ({}), using fallback session id source", e);
        bytes = fallback_bytes();
    }
    Builder::from_random_bytes(bytes)
        .into_uuid()
        .simple()
        .to_string()
}

fn fallback_bytes() -> [u8; 16] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let counter = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(counter.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(format!("{:?}", std::thread::current().id()).as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes
}

/// Check that a client-supplied token can be used as a session id
///
/// Tokens must not contain `.`, which separates segments of the networked
/// key namespace, nor glob metacharacters.
pub fn is_valid_id(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_ID_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
