// Agent caller with degraded-mode fallback
//
// Wraps the AgentDriver seam with transient-error classification, a
// fixed-delay retry loop, and an automatic switch to a cheaper model after
// repeated failures in the same run. The model choice is re-evaluated on
// every attempt so degradation kicks in mid-retry-loop, not only on the next
// call.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use agentflow_core::{AgentDriver, AgentMessage, EngineError, Result, RetryPolicy};

/// Model selection and retry settings for the agent caller
#[derive(Debug, Clone)]
pub struct AgentCallerConfig {
    /// Model used while the run is healthy
    pub primary_model: String,
    /// Cheaper/lighter model used after repeated failures
    pub lite_model: String,
    /// Consecutive failures before switching to the lite model
    pub degrade_after: u32,
    pub retry: RetryPolicy,
}

impl Default for AgentCallerConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4o".into(),
            lite_model: "gpt-4o-mini".into(),
            degrade_after: 2,
            retry: RetryPolicy::default(),
        }
    }
}

/// Invokes the language-model capability with retry and degraded-mode fallback
pub struct AgentCaller {
    driver: Arc<dyn AgentDriver>,
    config: AgentCallerConfig,
    /// Consecutive transient failures; reset at the start of each run
    consecutive_failures: AtomicU32,
}

impl AgentCaller {
    pub fn new(driver: Arc<dyn AgentDriver>, config: AgentCallerConfig) -> Self {
        Self {
            driver,
            config,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Forget the failure streak. The executor calls this at the start of
    /// every run so degradation never leaks from one run into the next.
    pub fn reset_degradation(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Model for the next attempt, given the failure streak so far
    fn current_model(&self) -> &str {
        if self.consecutive_failures.load(Ordering::Relaxed) >= self.config.degrade_after {
            &self.config.lite_model
        } else {
            &self.config.primary_model
        }
    }

    /// Call the agent, retrying transient failures with a fixed delay.
    ///
    /// `acting_user` is threaded through for tracing only; the driver itself
    /// is user-agnostic.
    pub async fn call(
        &self,
        messages: &[AgentMessage],
        acting_user: Option<Uuid>,
    ) -> Result<String> {
        debug!(?acting_user, messages = messages.len(), "Calling agent");

        self.config
            .retry
            .attempt(
                |attempt| async move {
                    let model = self.current_model().to_string();
                    if model == self.config.lite_model {
                        info!(attempt, model = %model, "Degraded mode: using lite model");
                    }

                    let outcome = self.driver.call(&model, messages).await;
                    match outcome {
                        Ok(content) if content.trim().is_empty() => {
                            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                            Err(EngineError::transient("agent returned empty content"))
                        }
                        Ok(content) => {
                            self.consecutive_failures.store(0, Ordering::Relaxed);
                            Ok(content)
                        }
                        Err(err) => {
                            let err = classify(err);
                            if err.is_transient() {
                                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                            } else {
                                warn!(error = %err, "Non-transient agent error");
                            }
                            Err(err)
                        }
                    }
                },
                EngineError::is_transient,
            )
            .await
    }
}

/// Classify an agent error by message heuristics.
///
/// Classification happens before the retry loop decides whether to
/// sleep-and-retry or escalate: rate limits, 5xx-style upstream failures and
/// temporary unavailability are transient, everything else is permanent.
fn classify(err: EngineError) -> EngineError {
    if err.is_transient() {
        return err;
    }
    let message = err.to_string();
    if is_transient_message(&message) {
        EngineError::transient(message)
    } else {
        err
    }
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["rate limit", "429", "500", "502", "503", "504", "timeout", "timed out",
        "temporarily unavailable", "overloaded", "empty content", "empty response"]
    .iter()
    .any(|needle| lower.contains(needle))
}
