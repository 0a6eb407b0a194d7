// Bounded retry with an injectable backoff and a per-call timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use super::{CompletionProvider, LlmError};

/// Delay to wait before retry number `attempt` (1-based: the first retry is attempt 1).
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// The same delay between every attempt.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff(pub Duration);

impl Backoff for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// `max_attempts` is the total number of calls made, so a policy of 2 calls
/// the provider at most twice. Delays are slept between attempts only.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn Backoff>,
    call_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Arc<dyn Backoff>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            call_timeout: None,
        }
    }

    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Arc::new(ConstantBackoff(delay)))
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = Some(call_timeout);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `f` until it succeeds or the attempt budget is spent.
    /// Returns the last error on exhaustion.
    pub async fn call<F, Fut, T>(&self, label: &str, mut f: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match self.call_timeout {
                Some(limit) => match timeout(limit, f()).await {
                    Ok(inner) => inner,
                    Err(_) => Err(LlmError::Timeout {
                        secs: limit.as_secs(),
                    }),
                },
                None => f().await,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "{label}: attempt {}/{} failed ({e}), retrying in {}ms",
                        attempt,
                        self.max_attempts,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// `provider.chat(system, user)` under this policy.
    pub async fn chat(
        &self,
        provider: &dyn CompletionProvider,
        system: &str,
        user: &str,
    ) -> Result<String, LlmError> {
        self.call(provider.name(), move || provider.chat(system, user))
            .await
    }
}
