//! Total order over byte sequences.
//!
//! Unsigned byte-wise comparison where a shorter sequence sorts first when it
//! is a prefix of the longer one. Index entries, separators and range bounds
//! are all ordered with these helpers.

use std::cmp::Ordering;

/// Compares two byte sequences.
///
/// Compares the first 8 bytes as a big-endian u64 before falling back to
/// slice comparison, which keeps long shared-prefix keys cheap.
#[inline(always)]
pub fn compare_bytes(a: &[u8], b: &[u8]) -> Ordering {
    if a.len() >= 8 && b.len() >= 8 {
        let a_prefix = u64::from_be_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]);
        let b_prefix = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        if a_prefix != b_prefix {
            return a_prefix.cmp(&b_prefix);
        }
        return a[8..].cmp(&b[8..]);
    }
    a.cmp(b)
}

/// Length of the common prefix of two sequences.
#[inline]
pub fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Smallest sequence greater than every sequence starting with `prefix`.
///
/// Trailing 0xFF bytes are dropped and the last remaining byte incremented.
/// Returns None when no such sequence exists (empty or all-0xFF prefix).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    while let Some(last) = succ.pop() {
        if last != u8::MAX {
            succ.push(last + 1);
            return Some(succ);
        }
    }
    None
}

/// Returns true if `key` starts with `prefix`.
#[inline]
pub fn has_prefix(key: &[u8], prefix: &[u8]) -> bool {
    key.len() >= prefix.len() && key[..prefix.len()] == *prefix
}
