//! Retry backoff policy.
//!
//! Failed records are re-enqueued with an exponentially growing delay:
//! `base * 2^(attempts - 1)` seconds, capped at one hour. A base of zero
//! disables backoff and re-enqueues immediately.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceiling applied to computed delays. The cap bounds the delay only; it
/// never reduces the number of delivery attempts.
pub const MAX_BACKOFF_SECS: u64 = 3600;

/// Exponential backoff policy for failed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay in seconds; 0 disables backoff.
    pub base_secs: u64,
}

impl BackoffPolicy {
    /// Create a policy with the given base delay.
    pub fn new(base_secs: u64) -> Self {
        Self { base_secs }
    }

    /// Create a policy with backoff disabled.
    pub fn none() -> Self {
        Self { base_secs: 0 }
    }

    /// Check whether backoff is enabled.
    pub fn is_enabled(&self) -> bool {
        self.base_secs > 0
    }

    /// Delay before the next attempt, given the number of reservations the
    /// record has already been through (1 after the first failure).
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if self.base_secs == 0 || attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = attempts.saturating_sub(1).min(63);
        let secs = self.base_secs.saturating_mul(1u64 << exponent);
        Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
    }
}

impl Default for BackoffPolicy {
    /// Default policy: no backoff.
    fn default() -> Self {
        Self::none()
    }
}
