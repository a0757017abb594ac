//! Retry policies for recovering a connection.
//!
//! The read loop uses [`retry_with_policy`] to reestablish a protocol connection
//! after a close-required error. Backoff waits go through a [`StopSignal`], so a
//! shutdown request interrupts a reconnect cycle instead of waiting it out.

use std::time::Duration;
use tracing::debug;

use crate::config::CommunicatorConfig;
use crate::thread::StopSignal;

/// Defines a policy for retrying an operation.
///
/// Specifies how many times to attempt a failed operation and how long to wait
/// between attempts.
///
/// # Example
///
/// ```rust
/// use sensor_gateway::error_recovery::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: 5,
///     backoff_delay: Duration::from_millis(200),
/// };
/// assert_eq!(policy.max_attempts, 5);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts. Set to 0 to give up immediately.
    pub max_attempts: u32,

    /// The constant delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts, 100ms apart.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl From<&CommunicatorConfig> for RetryPolicy {
    fn from(config: &CommunicatorConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            backoff_delay: config.reconnect_backoff,
        }
    }
}

/// Why [`retry_with_policy`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Stop was requested before an attempt succeeded.
    Stopped,
    /// The operation failed with an error that must not be retried.
    Aborted(E),
    /// Every attempt failed; `last` is the final error, if any attempt ran.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: Option<E>,
    },
}

/// Run `operation` until it succeeds, following `policy`.
///
/// `operation` receives the 1-based attempt number. Errors for which `retryable`
/// returns `false` end the cycle immediately. On success the value is returned with
/// the number of attempts it took.
pub fn retry_with_policy<T, E, R, F>(
    policy: &RetryPolicy,
    stop: &StopSignal,
    retryable: R,
    mut operation: F,
) -> Result<(T, u32), RetryError<E>>
where
    R: Fn(&E) -> bool,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut last = None;
    for attempt in 1..=policy.max_attempts {
        if stop.is_triggered() {
            return Err(RetryError::Stopped);
        }

        match operation(attempt) {
            Ok(value) => return Ok((value, attempt)),
            Err(err) if !retryable(&err) => return Err(RetryError::Aborted(err)),
            Err(err) => {
                debug!(attempt, max_attempts = policy.max_attempts, "Recovery attempt failed");
                last = Some(err);
            }
        }

        if attempt < policy.max_attempts && stop.wait_timeout(policy.backoff_delay) {
            return Err(RetryError::Stopped);
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_delay, Duration::from_millis(100));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let stop = StopSignal::new();
        let result = retry_with_policy(&fast_policy(5), &stop, |_: &&str| true, |attempt| {
            if attempt < 3 {
                Err("not yet")
            } else {
                Ok(attempt * 10)
            }
        });
        assert_eq!(result, Ok((30, 3)));
    }

    #[test]
    fn exhaustion_reports_last_error() {
        let stop = StopSignal::new();
        let result: Result<((), u32), _> =
            retry_with_policy(&fast_policy(2), &stop, |_| true, |attempt| Err(attempt));
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 2,
                last: Some(2)
            })
        );
    }

    #[test]
    fn zero_attempts_gives_up_immediately() {
        let stop = StopSignal::new();
        let result: Result<((), u32), RetryError<()>> =
            retry_with_policy(&fast_policy(0), &stop, |_| true, |_| unreachable!());
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 0,
                last: None
            })
        );
    }

    #[test]
    fn non_retryable_error_aborts() {
        let stop = StopSignal::new();
        let mut calls = 0;
        let result: Result<((), u32), _> =
            retry_with_policy(&fast_policy(5), &stop, |err: &u32| *err != 99, |_| {
                calls += 1;
                Err(99u32)
            });
        assert_eq!(result, Err(RetryError::Aborted(99)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn stop_interrupts_backoff() {
        let stop = StopSignal::new();
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff_delay: Duration::from_secs(30),
        };

        let trigger = {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                stop.trigger();
            })
        };

        let start = Instant::now();
        let result: Result<((), u32), _> =
            retry_with_policy(&policy, &stop, |_| true, |_| Err("down"));
        trigger.join().unwrap();

        assert_eq!(result, Err(RetryError::Stopped));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
