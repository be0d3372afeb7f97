//! Bearer-token authentication with timing-safe comparison.

/// Constant-time byte comparison: equal-length-first, then XOR accumulation.
///
/// Never short-circuits on the first differing byte, so response timing does
/// not leak the token prefix.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Check an `Authorization` header value against the configured token.
pub fn bearer_matches(header: Option<&str>, token: &str) -> bool {
    match header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(presented) => constant_time_eq(presented.as_bytes(), token.as_bytes()),
        None => false,
    }
}
