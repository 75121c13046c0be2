//! Lock key derivation
//!
//! Postgres advisory locks are keyed by a pair of 32-bit integers; named locks
//! need a stable mapping from a string to that pair. Every process must derive
//! the same pair from the same name for the lock to provide mutual exclusion.

/// Derive a deterministic `(i32, i32)` pair from a lock name.
///
/// The first eight bytes of the md5 digest are split into two big-endian
/// integers.
pub fn string_to_pair(name: &str) -> (i32, i32) {
    let digest = md5::compute(name.as_bytes());
    let first = i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let second = i32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]);
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_deterministic() {
        assert_eq!(string_to_pair("migration-lock"), string_to_pair("migration-lock"));
    }

    #[test]
    fn test_distinct_names_get_distinct_pairs() {
        assert_ne!(string_to_pair("migration-lock"), string_to_pair("seed-lock"));
        assert_ne!(string_to_pair(""), string_to_pair("migration-lock"));
    }
}
