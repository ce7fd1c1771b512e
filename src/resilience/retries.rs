//! Retry logic.
//!
//! # Responsibilities
//! - Classify attempt outcomes (success, retryable, fatal)
//! - Enforce the retry budget (max attempts per logical request)
//! - Compute the optional pause between attempts
//!
//! # Design Decisions
//! - Connection errors and timeouts are retryable; 5xx are configurable
//! - 4xx are never retried and never count against node health
//! - Cancellation is never retried

use std::time::Duration;

use crate::config::RetryBackoffConfig;
use crate::error::TransportError;
use crate::resilience::backoff::retry_delay;

/// How the transport should react to an attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Return the response to the caller.
    Success,
    /// Mark the node dead and try another one.
    Retry,
    /// Surface the error immediately; node health untouched.
    Fail,
}

/// Retry budget and outcome classification for one transport.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_on_status: Vec<u16>,
    backoff: Option<RetryBackoffConfig>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_on_status: Vec<u16>, backoff: Option<RetryBackoffConfig>) -> Self {
        Self {
            max_retries,
            retry_on_status,
            backoff,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts allowed for `max_retries` retries.
    pub fn max_attempts(max_retries: u32) -> u32 {
        max_retries.saturating_add(1)
    }

    /// Classify an HTTP status. `ignore` lists statuses the caller accepts.
    pub fn classify_status(&self, status: u16, ignore: &[u16]) -> Verdict {
        if (200..300).contains(&status) || ignore.contains(&status) {
            Verdict::Success
        } else if self.retry_on_status.contains(&status) {
            Verdict::Retry
        } else {
            Verdict::Fail
        }
    }

    /// Classify a failed attempt.
    pub fn classify_error(&self, err: &TransportError) -> Verdict {
        match err {
            TransportError::Connection(e) if e.is_retryable() => Verdict::Retry,
            TransportError::Timeout(_) => Verdict::Retry,
            _ => Verdict::Fail,
        }
    }

    /// Pause before attempt number `attempt` (1-based), if backoff is enabled.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 {
            return None;
        }
        let backoff = self.backoff.as_ref()?;
        let delay = retry_delay(attempt - 1, backoff, &mut rand::thread_rng());
        (!delay.is_zero()).then_some(delay)
    }
}
