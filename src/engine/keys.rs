//! Random key generation for structurally-typed array elements.
//!
//! Every element of `children`/`rows`/`columns`/`content` carries a `key`
//! that must be a random alphanumeric token — never a semantic slug like
//! `"hero-row"`, which would collide across documents and defeat the
//! key-predicate addressing scheme.

use uuid::Uuid;

/// Length of generated array keys. Anything at or above the validator's
/// minimum (default 10) is acceptable; 12 matches what the backend issues.
pub const GENERATED_KEY_LEN: usize = 12;

/// Generate a fresh random alphanumeric key.
pub fn random_key() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..GENERATED_KEY_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_alphanumeric_and_long_enough() {
        for _ in 0..32 {
            let key = random_key();
            assert_eq!(key.len(), GENERATED_KEY_LEN);
            assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_keys_are_unique() {
        let a = random_key();
        let b = random_key();
        assert_ne!(a, b);
    }
}
