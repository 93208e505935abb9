//! Fingerprints for change detection and content keys for deduplication.

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Deterministic hash of a document's full text. Only compared against
/// earlier fingerprints of the same path.
pub fn fingerprint(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Hash of `text` after case folding and whitespace collapsing, so the same
/// passage returned by two backends with different spacing maps to one key.
pub fn content_key(text: &str) -> String {
    let mut hasher = XxHash64::with_seed(0);
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            hasher.write_u8(b' ');
        }
        hasher.write(word.to_lowercase().as_bytes());
    }
    format!("{:016x}", hasher.finish())
}
