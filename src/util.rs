/// Small helpers shared by the stream client.
///
/// IMPORTANT:
/// - Nothing stream- or broker-specific belongs here.
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, distr::Alphanumeric};

/// Current Unix timestamp in whole seconds.
///
/// A clock set before the epoch yields 0 rather than panicking.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Random alphanumeric string, used as a request nonce.
pub fn nonce(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_alphanumeric_and_sized() {
        let n = nonce(32);
        assert_eq!(n.len(), 32);
        assert!(n.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(n, nonce(32));
    }

    #[test]
    fn clock_is_past_2020() {
        assert!(now_secs() > 1_577_836_800);
    }
}
