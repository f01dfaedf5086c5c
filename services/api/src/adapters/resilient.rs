//! services/api/src/adapters/resilient.rs
//!
//! A decorator that bounds every oracle call with a timeout and retries
//! transient failures with exponential backoff.

use async_trait::async_trait;
use newsgenie_core::ports::{LlmOracle, PortError, PortResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const BASE_BACKOFF: Duration = Duration::from_millis(500);

pub struct RetryingOracle {
    inner: Arc<dyn LlmOracle>,
    timeout: Duration,
    max_retries: u32,
}

impl RetryingOracle {
    pub fn new(inner: Arc<dyn LlmOracle>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            inner,
            timeout,
            max_retries,
        }
    }

    fn backoff(retry: u32) -> Duration {
        BASE_BACKOFF * 2u32.saturating_pow(retry)
    }

    async fn attempt(&self, system_prompt: &str, user_text: &str) -> PortResult<String> {
        tokio::time::timeout(self.timeout, self.inner.complete(system_prompt, user_text))
            .await
            .map_err(|_| {
                PortError::UpstreamTimeout(format!("language model gave no answer within {}s", self.timeout.as_secs()))
            })?
    }
}

#[async_trait]
impl LlmOracle for RetryingOracle {
    async fn complete(&self, system_prompt: &str, user_text: &str) -> PortResult<String> {
        let mut retry = 0;
        loop {
            match self.attempt(system_prompt, user_text).await {
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let delay = Self::backoff(retry);
                    warn!(attempt = retry + 1, delay_ms = delay.as_millis() as u64, error = %e, "retrying language model call");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }
}
