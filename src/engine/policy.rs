// The resolver call policy envelope (spec.md §5): timeout -> retry ->
// circuit breaker, innermost to outermost.
//
// The retry loop with increasing delay is grounded on the teacher's
// `llm::router`'s failover loop (`retry_count`, `retry_delay_ms *
// retry_count`); the circuit breaker state machine itself has no
// direct teacher precedent to reuse code from — the teacher's own
// "circuit breaker" naming turned out to describe LLM request routing,
// not a literal open/closed/half-open breaker — so CLOSED/OPEN/HALF_OPEN
// is built fresh here, in the teacher's `RwLock`-guarded-state idiom
// (`engine::storage::InMemoryStorage`).

use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{BackoffStrategy, PolicyConfig};
use crate::error::{AgentlangError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-resolver circuit breaker state (spec.md §5). One instance
/// guards one named resolver; the evaluator keeps one per resolver
/// name alongside the `ResolverRegistry`.
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: RwLock<u32>,
    opened_at: RwLock<Option<Instant>>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(policy: &PolicyConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: RwLock::new(0),
            opened_at: RwLock::new(None),
            failure_threshold: policy.failure_threshold,
            reset_timeout: policy.reset_timeout(),
        }
    }

    /// Whether a call may proceed right now. OPEN transitions itself to
    /// HALF_OPEN once `reset_timeout` has elapsed, admitting exactly
    /// the next call as a probe (spec.md §5).
    fn allow_call(&self) -> bool {
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self.opened_at.read().unwrap().map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    *state = CircuitState::HalfOpen;
                    debug!("circuit half-open: probing after reset timeout");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.write().unwrap();
        *state = CircuitState::Closed;
        *self.failure_count.write().unwrap() = 0;
    }

    fn record_failure(&self) {
        let mut count = self.failure_count.write().unwrap();
        *count += 1;
        if *count >= self.failure_threshold {
            let mut state = self.state.write().unwrap();
            if *state != CircuitState::Open {
                warn!(failures = *count, "circuit opened");
            }
            *state = CircuitState::Open;
            *self.opened_at.write().unwrap() = Some(Instant::now());
        }
    }
}

fn backoff_delay(strategy: BackoffStrategy, attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let ms = match strategy {
        BackoffStrategy::Constant => base_ms,
        BackoffStrategy::Linear => base_ms * (attempt as u64 + 1),
        BackoffStrategy::Exponential => base_ms.saturating_mul(1u64 << attempt.min(16)),
    };
    Duration::from_millis(ms.min(max_ms))
}

/// Runs `call` under the full policy envelope: a timeout per attempt,
/// `max_retries` retries with the configured backoff, and a circuit
/// breaker that trips `ResolverUnavailable` without even attempting
/// the call once it's open (spec.md §5).
pub async fn call_with_policy<T, F, Fut>(
    policy: &PolicyConfig,
    breaker: &CircuitBreaker,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    if !breaker.allow_call() {
        return Err(AgentlangError::ResolverUnavailable("circuit open".into()));
    }

    let mut attempt = 0;
    loop {
        let outcome = tokio::time::timeout(policy.request_timeout(), call()).await;
        let result = match outcome {
            Ok(inner) => inner,
            Err(_) => Err(AgentlangError::ResolverUnavailable(format!(
                "call timed out after {}ms",
                policy.request_timeout_ms
            ))),
        };

        match result {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(err) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = backoff_delay(policy.backoff_strategy, attempt, 100, policy.max_delay_ms);
                debug!(attempt, ?delay, "retrying resolver call after failure: {err}");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                breaker.record_failure();
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> PolicyConfig {
        PolicyConfig {
            request_timeout_ms: 50,
            max_retries: 2,
            backoff_strategy: BackoffStrategy::Constant,
            max_delay_ms: 10,
            failure_threshold: 2,
            reset_timeout_ms: 20,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_call_succeeds_first_try() {
        let policy = fast_policy();
        let breaker = CircuitBreaker::new(&policy);
        let result: Result<i32> = call_with_policy(&policy, &breaker, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_then_surfaces_the_final_error() {
        let policy = fast_policy();
        let breaker = CircuitBreaker::new(&policy);
        let calls = AtomicU32::new(0);
        let result: Result<i32> = call_with_policy(&policy, &breaker, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentlangError::ResolverUnavailable("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_rejects_without_calling() {
        let policy = fast_policy();
        let breaker = CircuitBreaker::new(&policy);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _: Result<i32> = call_with_policy(&policy, &breaker, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentlangError::ResolverUnavailable("boom".into())) }
            })
            .await;
        }

        let before = calls.load(Ordering::SeqCst);
        let result: Result<i32> = call_with_policy(&policy, &breaker, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), before, "breaker rejected before calling");
    }
}
