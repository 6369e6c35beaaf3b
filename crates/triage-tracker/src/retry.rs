//! Bounded retry with exponential backoff.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use triage_core::config::TrackerSettings;

use crate::error::TrackerError;

/// Whether repeating a request can duplicate its effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Reads, field sets, tag attaches, task updates.
    Safe,
    /// Task creation: a repeat may create a second task.
    Create,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// The tracker deduplicates creates, so timeouts may be retried too.
    pub service_dedupes: bool,
}

impl RetryPolicy {
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_interval: Duration::from_millis(settings.initial_backoff_ms),
            max_interval: Duration::from_millis(settings.max_backoff_ms),
            service_dedupes: settings.service_dedupes,
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: 2.0,
            randomization_factor: 0.2,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    pub fn should_retry(&self, err: &TrackerError, kind: Idempotency, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        match kind {
            Idempotency::Safe => err.is_transient(),
            Idempotency::Create => {
                err.not_applied() || (self.service_dedupes && err.is_transient())
            }
        }
    }

    /// Delay before retry number `attempt + 1`, if any remain.
    pub fn next_delay(&self, backoff: &mut ExponentialBackoff) -> Option<Duration> {
        backoff.next_backoff()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&TrackerSettings::default())
    }
}
