//! Retry policy
//!
//! Bounded exponential backoff for transient storage failures. Fatal
//! classifications are never retried: repeating a constraint violation or a
//! serialization failure reproduces the exact failure. Jitter keeps multiple
//! worker processes hitting the same backend from retrying in lockstep.

use crate::error::ErrorClass;
use flowd_common::db::get_setting_u64;
use rand::Rng;
use sqlx::SqlitePool;
use std::time::Duration;

/// Bounded exponential-backoff decision function
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum calls per operation, first attempt included
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub initial_backoff: Duration,
    /// Hard ceiling on any single backoff delay
    pub backoff_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            backoff_ceiling: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Load the policy from the settings table, falling back to defaults
    pub async fn from_settings(pool: &SqlitePool) -> flowd_common::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_attempts: get_setting_u64(
                pool,
                "ingest_commit_max_attempts",
                defaults.max_attempts as u64,
            )
            .await? as u32,
            initial_backoff: Duration::from_millis(
                get_setting_u64(
                    pool,
                    "ingest_backoff_initial_ms",
                    defaults.initial_backoff.as_millis() as u64,
                )
                .await?,
            ),
            backoff_ceiling: Duration::from_millis(
                get_setting_u64(
                    pool,
                    "ingest_backoff_ceiling_ms",
                    defaults.backoff_ceiling.as_millis() as u64,
                )
                .await?,
            ),
        })
    }

    /// Decide whether another attempt is allowed after `attempts_made` calls
    /// ended in an error of the given class
    pub fn should_retry(&self, attempts_made: u32, class: ErrorClass) -> bool {
        class == ErrorClass::Transient && attempts_made < self.max_attempts
    }

    /// Delay before the attempt following `attempts_made` failed calls.
    ///
    /// Grows exponentially from the initial backoff, capped at the ceiling,
    /// with random jitter in the upper half of the window.
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        let base_ms = self
            .initial_backoff
            .as_millis()
            .saturating_mul(1u128 << exponent)
            .min(self.backoff_ceiling.as_millis()) as u64;

        if base_ms == 0 {
            return Duration::ZERO;
        }

        let half = base_ms / 2;
        let jittered = half + rand::thread_rng().gen_range(0..=base_ms - half);
        Duration::from_millis(jittered)
    }
}
