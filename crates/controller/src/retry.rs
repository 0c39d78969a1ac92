/*
 * 5D Labs Namespace Label Operator - Kubernetes Label Reconciliation
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Bounded retry for optimistic-concurrency writes.
//!
//! Read-modify-write cycles against the API server fail with 409 when another
//! writer lands first. [`retry_on_conflict`] re-runs the whole cycle a bounded
//! number of times with exponential backoff and jitter, and turns exhaustion
//! into [`Error::PersistFailed`]. Any other error is returned immediately.

use crate::tasks::config::ApplyConfig;
use crate::tasks::types::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for conflict retries
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Same attempt budget with no sleeping between attempts
    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.initial_delay = Duration::ZERO;
        self
    }
}

impl From<&ApplyConfig> for RetryConfig {
    fn from(apply: &ApplyConfig) -> Self {
        Self {
            max_attempts: apply.max_attempts.max(1),
            initial_delay: Duration::from_millis(apply.initial_backoff_millis),
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds, fails with something other than a
/// conflict, or `max_attempts` is used up.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = %operation_name,
                        attempt,
                        "Operation succeeded after conflict retries"
                    );
                }
                return Ok(value);
            }
            Err(Error::Conflict { kind, name }) => {
                if attempt >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempt,
                        kind,
                        name = %name,
                        "Conflict retries exhausted"
                    );
                    return Err(Error::PersistFailed {
                        kind,
                        name,
                        attempts: attempt,
                    });
                }

                let jittered = if delay.is_zero() {
                    delay
                } else {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
                };

                debug!(
                    operation = %operation_name,
                    attempt,
                    kind,
                    name = %name,
                    delay_ms = jittered.as_millis(),
                    "Write conflicted, re-reading and retrying"
                );

                if !jittered.is_zero() {
                    tokio::time::sleep(jittered).await;
                }

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(other) => return Err(other),
        }
    }
}
