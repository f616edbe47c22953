use std::future::Future;
use std::time::Duration;

use tracing::warn;

use shared_config::AppConfig;
use shared_models::error::SyncError;

/// Linear backoff retry for outbound CRM writes: `attempt * base_delay`
/// between attempts, only for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} failed on attempt {}/{}, retrying in {:?}: {}",
                        operation, attempt, self.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
