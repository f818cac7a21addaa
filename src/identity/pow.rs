// Proof of Work - Hash puzzle binding an identity to CPU cost
// Principle: Mass identity generation must be expensive, verification cheap

use sha2::{Digest, Sha256};

/// Required hex prefix of SHA-256(id || decimal(nonce))
pub const POW_PREFIX: &str = "0000";

/// Compute the PoW digest for an (id, nonce) pair, as lowercase hex
pub fn digest_hex(id: &str, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Check that an (id, nonce) pair satisfies the default PoW prefix
pub fn verify(id: &str, nonce: u64) -> bool {
    verify_with_prefix(id, nonce, POW_PREFIX)
}

/// Check an (id, nonce) pair against an explicit prefix
pub fn verify_with_prefix(id: &str, nonce: u64, prefix: &str) -> bool {
    digest_hex(id, nonce).starts_with(prefix)
}

/// Mine the smallest nonce satisfying the default prefix by linear scan
/// from 0. Expected work is ~16^|prefix| hashes; terminates with
/// probability 1.
pub fn mine(id: &str) -> u64 {
    mine_with_prefix(id, POW_PREFIX)
}

/// Mine against an explicit prefix (shorter prefixes keep tests fast)
pub fn mine_with_prefix(id: &str, prefix: &str) -> u64 {
    let mut nonce = 0u64;
    loop {
        if verify_with_prefix(id, nonce, prefix) {
            return nonce;
        }
        nonce += 1;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mined_nonce_verifies() {
        let id = "deadbeef";
        let nonce = mine_with_prefix(id, "00");
        assert!(verify_with_prefix(id, nonce, "00"));
    }

    #[test]
    fn test_mine_returns_smallest_nonce() {
        let id = "cafe";
        let nonce = mine_with_prefix(id, "0");
        for earlier in 0..nonce {
            assert!(!verify_with_prefix(id, earlier, "0"));
        }
    }

    #[test]
    fn test_full_prefix_mining() {
        // The real 4-hex-char prefix averages ~65k hashes; still fast.
        let id = "a1b2c3d4e5f6";
        let nonce = mine(id);
        assert!(verify(id, nonce));
        assert!(digest_hex(id, nonce).starts_with("0000"));
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(digest_hex("abc", 42), digest_hex("abc", 42));
        assert_ne!(digest_hex("abc", 42), digest_hex("abc", 43));
    }

    #[test]
    fn test_nonce_concatenation_is_decimal() {
        // (id="x", nonce=12) must hash "x12", not "x" || 0x0C
        let mut hasher = sha2::Sha256::new();
        hasher.update(b"x12");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(digest_hex("x", 12), expected);
    }

    proptest! {
        // P2: only pairs satisfying the prefix verify
        #[test]
        fn prop_verify_matches_digest(id in "[0-9a-f]{8,88}", nonce in 0u64..1_000_000) {
            let ok = verify(&id, nonce);
            prop_assert_eq!(ok, digest_hex(&id, nonce).starts_with(POW_PREFIX));
        }
    }
}
