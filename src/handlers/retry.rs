//! Optimistic retry
//!
//! Re-runs a whole read-modify-commit attempt when the balance version moved
//! underneath it. Each attempt starts from a fresh read, including the
//! idempotency check.
//!
//! Shutdown is observed only in the read-modify half of an attempt. A commit
//! that has started always finishes and its outcome is reported, so a caller
//! never sees `Cancelled` for a write that landed.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::{LedgerError, LedgerResult};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Linear backoff step; also the upper bound of the random jitter
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms);
        Duration::from_millis(base_ms * attempt as u64 + jitter_ms)
    }
}

/// Drive the planning half of an attempt; `Cancelled` if shutdown wins
pub(crate) async fn plan_unless_shutdown<T, Fut>(
    shutdown: &Shutdown,
    plan: Fut,
) -> LedgerResult<T>
where
    Fut: Future<Output = LedgerResult<T>>,
{
    shutdown
        .run_until(plan)
        .await
        .unwrap_or(Err(LedgerError::Cancelled))
}

pub(crate) async fn with_optimistic_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt_fn: F,
) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match attempt_fn().await {
            Err(e) if e.is_version_conflict() => {
                if attempt >= max_attempts {
                    tracing::error!(
                        operation,
                        attempts = attempt,
                        "Concurrency retries exhausted"
                    );
                    return Err(LedgerError::ConcurrencyExhausted { attempts: attempt });
                }

                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Concurrency conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
