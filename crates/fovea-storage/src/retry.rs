//! Capped exponential backoff over transient storage failures.

use std::time::Duration;

use tracing::warn;

use crate::backend::StorageError;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial: Duration::from_millis(25),
            multiplier: 2,
            max_delay: Duration::from_secs(1),
        }
    }
}

/// Run `op`, retrying transient failures with exponential delay.
///
/// Non-transient errors propagate immediately. Once `max_attempts` is
/// reached the last transient error is wrapped in `RetriesExhausted`.
pub fn with_backoff<T>(
    policy: &BackoffPolicy,
    mut op: impl FnMut() -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    let mut delay = policy.initial;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                    "transient storage failure, backing off");
                std::thread::sleep(delay);
                delay = (delay * policy.multiplier).min(policy.max_delay);
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(StorageError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> StorageError {
        StorageError::Transient {
            path: "x".into(),
            source: std::io::Error::new(std::io::ErrorKind::Interrupted, "flaky"),
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(1),
            ..BackoffPolicy::default()
        };
        let mut failures = 2;
        let value = with_backoff(&policy, || {
            if failures > 0 {
                failures -= 1;
                Err(transient())
            } else {
                Ok(41)
            }
        })
        .unwrap();
        assert_eq!(value, 41);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            initial: Duration::from_millis(1),
            ..BackoffPolicy::default()
        };
        let mut calls = 0;
        let err = with_backoff(&policy, || -> Result<(), _> {
            calls += 1;
            Err(transient())
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(err, StorageError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn fatal_errors_do_not_retry() {
        let policy = BackoffPolicy::default();
        let mut calls = 0;
        let err = with_backoff(&policy, || -> Result<(), _> {
            calls += 1;
            Err(StorageError::NotFound { path: "gone".into() })
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}
