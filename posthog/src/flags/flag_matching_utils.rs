use sha1::{Digest, Sha1};

const LONG_SCALE: u64 = 0xfffffffffffffff;

/// Deterministic bucketing shared with every other PostHog SDK: SHA-1 over
/// `"{flag_key}.{identifier}{salt}"`, keep the leading 15 hex digits and
/// normalize into [0, 1). The construction must not change; it is the
/// compatibility boundary that keeps rollouts consistent across SDKs.
pub fn calculate_hash(flag_key: &str, hashed_identifier: &str, salt: &str) -> f64 {
    let hash_key = format!("{flag_key}.{hashed_identifier}{salt}");
    let digest = Sha1::digest(hash_key.as_bytes());
    // The first 8 bytes shifted right by 4 bits are exactly the first 15 hex
    // characters (7.5 bytes) of the digest
    let hash_val: u64 =
        u64::from_be_bytes(digest[..8].try_into().expect("sha1 digest is 20 bytes")) >> 4;
    hash_val as f64 / LONG_SCALE as f64
}
