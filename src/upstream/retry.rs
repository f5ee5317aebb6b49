//! Bounded retries with exponential backoff and jitter for upstream calls.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use super::{LogEntry, Page, UpstreamApi, UpstreamSession};
use crate::error::UpstreamError;
use crate::model::Agent;

/// Backoff settings for upstream calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay after the `failures`-th failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Random extra delay, up to half the base delay.
    fn jitter(&self) -> Duration {
        let max_ms = (self.base_delay.as_millis() / 2) as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs out of attempts.
///
/// The last error is returned unchanged when attempts are exhausted.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut failures = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                failures += 1;
                if !e.is_retryable() || failures >= policy.max_attempts {
                    return Err(e);
                }
                let delay = policy.backoff(failures) + policy.jitter();
                warn!(
                    call = label,
                    attempt = failures,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Upstream call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Decorator that wraps every call of the inner API in `retry`.
pub struct RetryingUpstream<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A: UpstreamApi> RetryingUpstream<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Release the wrapped client.
    pub fn into_inner(self) -> A {
        self.inner
    }
}

#[async_trait]
impl<A: UpstreamApi> UpstreamApi for RetryingUpstream<A> {
    async fn list_agents(&self, page: u32, limit: u32) -> Result<Page<Agent>, UpstreamError> {
        retry(&self.policy, "list_agents", || self.inner.list_agents(page, limit)).await
    }

    async fn list_sessions(
        &self,
        agent_name: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<UpstreamSession>, UpstreamError> {
        retry(&self.policy, "list_sessions", || {
            self.inner.list_sessions(agent_name, page, limit)
        })
        .await
    }

    async fn list_logs(
        &self,
        agent_name: &str,
        session_id: Option<&str>,
        page: u32,
        limit: u32,
        query: Option<&str>,
    ) -> Result<Page<LogEntry>, UpstreamError> {
        retry(&self.policy, "list_logs", || {
            self.inner.list_logs(agent_name, session_id, page, limit, query)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn http(status: u16) -> UpstreamError {
        UpstreamError::Http {
            endpoint: "list_logs".into(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_is_bounded() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            assert!(policy.jitter() <= Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry(&instant_policy(3), "test", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(http(503))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry(&instant_policy(3), "test", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(http(429))
            } else {
                Ok(1)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&instant_policy(5), "test", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(http(401))
        })
        .await;
        assert!(matches!(result, Err(UpstreamError::Http { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&instant_policy(4), "test", || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Err(UpstreamError::Transport {
                endpoint: "list_agents".into(),
                reason: format!("attempt {n}"),
            })
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(UpstreamError::Transport { reason, .. }) => assert_eq!(reason, "attempt 3"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
