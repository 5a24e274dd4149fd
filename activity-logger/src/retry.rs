//! Bounded exponential backoff for batch dispatch.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::http::Transport;
use crate::{Error, LoggerConfig};

/// Attempt budget and backoff base for one batch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LoggerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.retry_base_delay,
        }
    }

    /// Wait after the zero-based `attempt` failed: `base * 2^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// How a batch dispatch ended.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// 2xx
    Delivered { attempts: u32 },
    /// 4xx, never retried
    Rejected { status: u16, attempts: u32 },
    /// 5xx or network failure on the final attempt
    Exhausted { error: Error, attempts: u32 },
}

impl DispatchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DispatchOutcome::Delivered { attempts }
            | DispatchOutcome::Rejected { attempts, .. }
            | DispatchOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// POST `body` to `url`, retrying retryable failures with backoff.
///
/// The final attempt's outcome is returned without a further wait.
pub async fn dispatch_with_retry(
    transport: &dyn Transport,
    policy: RetryPolicy,
    url: &str,
    bearer: &str,
    body: &Value,
) -> DispatchOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let error = match transport.post_json(url, bearer, body).await {
            Ok(response) => match response.into_result() {
                Ok(_) => return DispatchOutcome::Delivered { attempts: attempt + 1 },
                Err(e) => e,
            },
            Err(e) => e,
        };

        if !error.is_retryable() {
            if let Error::Http { status, .. } = error {
                return DispatchOutcome::Rejected {
                    status,
                    attempts: attempt + 1,
                };
            }
            return DispatchOutcome::Exhausted {
                error,
                attempts: attempt + 1,
            };
        }

        if attempt + 1 >= max_attempts {
            warn!(url, attempts = attempt + 1, error = %error, "Dispatch retries exhausted");
            return DispatchOutcome::Exhausted {
                error,
                attempts: attempt + 1,
            };
        }

        let delay = policy.delay_after(attempt);
        debug!(url, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %error, "Retrying dispatch");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    const URL: &str = "http://ingest.test/api/activity/actions";

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors_then_succeeds() {
        let transport = ScriptedTransport::new();
        transport.script(URL, [500, 500, 200]);

        let outcome =
            dispatch_with_retry(&transport, RetryPolicy::default(), URL, "tok", &json!({})).await;

        assert!(matches!(outcome, DispatchOutcome::Delivered { attempts: 3 }));
        let times = transport.request_times(URL);
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = ScriptedTransport::new();
        transport.script(URL, [401]);

        let outcome =
            dispatch_with_retry(&transport, RetryPolicy::default(), URL, "tok", &json!({})).await;

        assert!(matches!(outcome, DispatchOutcome::Rejected { status: 401, attempts: 1 }));
        assert_eq!(transport.request_count(URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failures_exhaust() {
        let transport = ScriptedTransport::new();
        transport.fail_network(URL);

        let outcome =
            dispatch_with_retry(&transport, RetryPolicy::default(), URL, "tok", &json!({})).await;

        match outcome {
            DispatchOutcome::Exhausted { error, attempts } => {
                assert_eq!(attempts, 3);
                assert!(matches!(error, Error::Network(_)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
