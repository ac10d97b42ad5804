// src/utils/retry.rs

//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{AppError, Result};

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Worth another try; returned as-is once attempts run out
    Retry(AppError),
    Fail(AppError),
}

/// Run `op` until it succeeds, fails permanently, or exhausts the policy.
///
/// `op` receives the 1-based attempt number.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, context: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(error) => return Err(error),
            Attempt::Retry(error) => {
                if attempt >= policy.max_attempts.max(1) {
                    log::warn!("Giving up on {} after {} attempts: {}", context, attempt, error);
                    return Err(error);
                }
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "Attempt {} for {} failed ({}), retrying in {:?}",
                    attempt,
                    context,
                    error,
                    delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Statuses that describe a temporary condition on the server side.
pub fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Transport failures worth another attempt.
pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}
