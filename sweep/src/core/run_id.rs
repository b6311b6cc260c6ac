//! Run identifier format.
//!
//! `{YYYYmmdd_HHMMSS}_{hash8}_{nonce}`: sortable by start time, traceable to
//! configuration content, unique through the nonce.

/// Number of content-hash characters embedded in a run id.
pub const HASH_PREFIX_LEN: usize = 8;

/// Number of random characters appended to a run id.
pub const NONCE_LEN: usize = 6;

pub fn build_run_id(timestamp: &str, content_hash: &str, nonce: &str) -> String {
    let end = content_hash.len().min(HASH_PREFIX_LEN);
    format!("{timestamp}_{}_{nonce}", &content_hash[..end])
}
