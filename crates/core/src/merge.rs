//! Prefix/suffix overlap merge for incremental gateway chunks.
//!
//! Chunks frequently restate the tail of what was already received (`"He"`,
//! then `"Hello "`, then `"Hello there!"`). Appending only the unseen suffix
//! keeps the accumulated text free of mid-word duplication that sentence-level
//! deduplication cannot repair.

/// Appends `chunk` to `accumulated`, dropping the longest prefix of `chunk`
/// that is also a suffix of `accumulated`.
pub fn merge_overlap(accumulated: &str, chunk: &str) -> String {
    let overlap = overlap_len(accumulated, chunk);
    let mut merged = String::with_capacity(accumulated.len() + chunk.len() - overlap);
    merged.push_str(accumulated);
    merged.push_str(&chunk[overlap..]);
    merged
}

/// Longest `k` such that the last `k` bytes of `accumulated` equal the first
/// `k` bytes of `chunk`, measured on char boundaries.
fn overlap_len(accumulated: &str, chunk: &str) -> usize {
    let max = accumulated.len().min(chunk.len());

    for len in (1..=max).rev() {
        if !chunk.is_char_boundary(len) {
            continue;
        }
        let tail_start = accumulated.len() - len;
        if accumulated.is_char_boundary(tail_start) && accumulated.ends_with(&chunk[..len]) {
            return len;
        }
    }

    0
}
