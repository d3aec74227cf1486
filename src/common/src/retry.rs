use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Fixed-backoff retry policy for store calls that can be rejected under
/// contention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Only `ErrorKind::Retryable` is retried here;
    /// conflicts are left to the orchestration engine. Exhaustion is fatal.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("[{op_name}] succeeded after {attempt} attempts");
                    }
                    return Ok(value);
                }
                Err(e) if e.kind() == crate::ErrorKind::Retryable => {
                    if attempt >= max_attempts {
                        log::error!("[{op_name}] ran out of retries after {attempt} attempts: {e}");
                        return Err(e.into_fatal(op_name));
                    }
                    log::warn!(
                        "[{op_name}] retryable error (attempt {attempt}/{max_attempts}), retrying after {:?}: {e}",
                        self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
