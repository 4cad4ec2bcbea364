//! Bounded polling with a fixed delay.
//!
//! Every wait on external state (a readiness marker in a log, a process
//! leaving the process table, a unit turning active) goes through [`retry`].

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// How many times to try and how long to sleep between failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    fn effective_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Returned when every attempt failed.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryError<E: std::fmt::Display + std::fmt::Debug> {
    pub attempts: u32,
    pub last: E,
}

/// Invoke `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. The delay is slept only between
/// attempts, never after the last one.
pub fn retry<T, E, F>(policy: RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display + std::fmt::Debug,
    F: FnMut(u32) -> Result<T, E>,
{
    let attempts = policy.effective_attempts();
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(last) if attempt >= attempts => return Err(RetryError { attempts, last }),
            Err(e) => {
                trace!(attempt, error = %e, "retry:attempt failed");
                thread::sleep(policy.delay);
                attempt += 1;
            }
        }
    }
}

/// Convenience wrapper for boolean predicates.
pub fn retry_until<F>(policy: RetryPolicy, mut predicate: F) -> Result<(), RetryError<String>>
where
    F: FnMut() -> bool,
{
    retry(policy, |_| {
        if predicate() {
            Ok(())
        } else {
            Err("condition not met".to_string())
        }
    })
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
