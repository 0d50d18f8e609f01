//! The `Secret` data model (SPEC_FULL §3).
//!
//! A `Secret` is loaded fresh on every verify call and never mutated by the
//! core; it lives only for the duration of that call.

use std::collections::HashSet;

use crate::totp::TOTP_STEP;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub max_attempts: u32,
    pub window_seconds: i64,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit {
            max_attempts: 3,
            window_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Secret {
    /// Base-32 shared secret, present after decryption if encrypted-at-rest.
    pub totp_key: String,
    pub rate_limit: RateLimit,
    /// Clock-skew tolerance in seconds. Already normalized via [`Secret::normalize_window`].
    pub window_size: i64,
    pub scratch_tokens: HashSet<String>,
}

impl Secret {
    /// Values under one TOTP step are meaningless as a skew tolerance and are
    /// folded down to zero (disabled).
    pub fn normalize_window(raw: i64) -> i64 {
        if raw < TOTP_STEP {
            0
        } else {
            raw
        }
    }

    pub fn new(totp_key: impl Into<String>) -> Self {
        Secret {
            totp_key: totp_key.into(),
            rate_limit: RateLimit::default(),
            window_size: 0,
            scratch_tokens: HashSet::new(),
        }
    }

    pub fn with_rate_limit(mut self, max_attempts: u32, window_seconds: i64) -> Self {
        self.rate_limit = RateLimit { max_attempts, window_seconds };
        self
    }

    pub fn with_window_size(mut self, window_size: i64) -> Self {
        self.window_size = Self::normalize_window(window_size);
        self
    }

    pub fn with_scratch_tokens(mut self, tokens: impl IntoIterator<Item = String>) -> Self {
        self.scratch_tokens = tokens.into_iter().collect();
        self
    }
}
