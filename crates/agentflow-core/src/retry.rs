// Explicit retry policy
//
// Replaces exception-driven retry control flow with a policy object: the
// caller supplies an operation and a transience classifier, and gets a tagged
// success/failure back. The inter-attempt wait is a parked tokio sleep, never
// a spin loop, and holds no locks.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, Result};

/// Fixed-interval retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,
    /// Fixed delay between attempts, in seconds
    pub delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_seconds: 60,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay_seconds: delay.as_secs(),
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay_seconds: 0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_seconds = delay.as_secs();
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// ceiling is reached.
    ///
    /// `is_transient` decides whether an error is worth sleeping on; a
    /// non-transient error is returned immediately. When all attempts are
    /// spent the last transient error escalates to `AgentExhausted`.
    pub async fn attempt<T, F, Fut, C>(&self, mut operation: F, is_transient: C) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&EngineError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error: Option<EngineError> = None;

        for attempt in 1..=max_attempts {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) => {
                    warn!(attempt, max_attempts, error = %err, "Transient failure, will retry");
                    last_error = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.delay()).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(EngineError::AgentExhausted {
            attempts: max_attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay_seconds: 0,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let result = quick_policy(3)
            .attempt(|_| async { Ok::<_, EngineError>(42) }, |e| e.is_transient())
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = quick_policy(3)
            .attempt(
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(EngineError::transient("rate limited"))
                        } else {
                            Ok("ok")
                        }
                    }
                },
                |e| e.is_transient(),
            )
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let err = quick_policy(5)
            .attempt(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(EngineError::MissingUserContext) }
                },
                |e| e.is_transient(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::MissingUserContext));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_escalates_with_attempt_count() {
        let err = quick_policy(2)
            .attempt(
                |_| async { Err::<(), _>(EngineError::transient("503")) },
                |e| e.is_transient(),
            )
            .await
            .unwrap_err();

        match err {
            EngineError::AgentExhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("503"));
            }
            other => panic!("expected AgentExhausted, got {other:?}"),
        }
    }
}
