// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for polling a condition on a fixed interval until it becomes
//! true, optionally giving up after a deadline.

use std::time::Duration;
use std::time::Instant;
use thiserror::Error;

/// Result of one check of a condition that's not yet satisfied.
#[derive(Debug, Error)]
pub enum CondCheckError<E: std::error::Error + Send + Sync + 'static> {
    /// the condition we're waiting for is not true
    #[error("poll condition not yet ready")]
    NotYet,
    /// the check failed in a way that should not be retried
    #[error("non-retryable error while polling on condition")]
    Failed(#[from] E),
}

/// Error returned by [`wait_for_condition`].
#[derive(Debug, Error)]
pub enum Error<E: std::error::Error + Send + Sync + 'static> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("non-retryable error while polling on condition")]
    PermanentError(#[source] E),
}

/// How often to check a condition, and for how long.
///
/// A `timeout` of `None` keeps polling until the condition holds or fails
/// permanently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    pub const fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { initial_delay: Duration::ZERO, interval, timeout }
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }
}

/// Poll the given closure until it succeeds, returns a permanent error, or
/// `policy.timeout` elapses.
///
/// The condition is always checked at least once after the initial delay,
/// and a timeout is only reported after a check performed past the deadline
/// has failed.
pub fn wait_for_condition<O, E, F>(
    policy: &RetryPolicy,
    mut cond: F,
) -> Result<O, Error<E>>
where
    F: FnMut() -> Result<O, CondCheckError<E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    if !policy.initial_delay.is_zero() {
        std::thread::sleep(policy.initial_delay);
    }
    let start = Instant::now();
    loop {
        let checked_at = Instant::now();
        match cond() {
            Ok(output) => return Ok(output),
            Err(CondCheckError::Failed(e)) => {
                return Err(Error::PermanentError(e))
            }
            Err(CondCheckError::NotYet) => (),
        }

        let elapsed = checked_at.duration_since(start);
        if let Some(timeout) = policy.timeout {
            if elapsed >= timeout {
                return Err(Error::TimedOut(start.elapsed()));
            }
        }
        std::thread::sleep(policy.interval);
    }
}
