use std::future::Future;
use std::time::Duration;

use djb_storage::FetchError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Wall-clock ceiling for one invocation, plus a cancellation signal that
/// fires when the ceiling passes or the caller gives up.
#[derive(Debug, Clone)]
pub struct RunBudget {
    deadline: Instant,
    cancel: CancellationToken,
}

impl RunBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            deadline: Instant::now() + limit,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_token(limit: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + limit,
            cancel,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        self.cancel.is_cancelled() || self.remaining().is_zero()
    }

    /// The per-request timeout, shortened to whatever budget is left.
    pub fn request_timeout(&self, per_request: Duration) -> Duration {
        per_request.min(self.remaining())
    }

    /// Sleep unless cancelled first. Returns `false` if the sleep was cut short
    /// or the budget ran out.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_exhausted();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration.min(self.remaining())) => !self.is_exhausted(),
        }
    }

    /// Race a fetch against cancellation and the deadline.
    pub async fn guard<T, F>(&self, url: &str, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
            _ = tokio::time::sleep_until(self.deadline) => {
                self.cancel.cancel();
                Err(FetchError::Cancelled { url: url.to_string() })
            }
            result = fut => result,
        }
    }
}
