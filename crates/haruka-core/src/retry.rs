//! Bounded backoff on upstream quota signals.
//!
//! [`RetryExecutor`] wraps an asynchronous action against a quota-limited
//! external system. When the action fails with an error that carries a
//! "retry after N" hint (see [`RetryAfter`]), the executor sleeps exactly the
//! declared duration and tries again, within three caps:
//!
//! | Cap | Exceeded when |
//! |-----|---------------|
//! | `max_wait` | a single declared wait is longer than the cap (no sleep happens) |
//! | `max_total_wait` | the accumulated wait of this call would pass the cap |
//! | `max_retries` | the action already failed `max_retries` times with a quota signal |
//!
//! Every other error is returned immediately, unmodified, as
//! [`RetryError::Inner`].
//!
//! The action may run more than once. Callers must only wrap actions that are
//! safe to repeat; the executor cannot check this.
//!
//! ```rust,ignore
//! let executor = RetryExecutor::new(RetryPolicy::default());
//! let sent = executor
//!     .execute(|| transport.send(chat_id, "hello", None))
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Implemented by errors that may carry a server-declared backoff.
pub trait RetryAfter {
    /// Returns the declared wait, or `None` when the error is not a quota
    /// signal.
    fn retry_after(&self) -> Option<Duration>;
}

/// Caps applied by [`RetryExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Longest single wait the executor accepts.
    pub max_wait: Duration,
    /// Longest accumulated wait across one `execute` call.
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_wait: Duration::from_secs(60),
            max_total_wait: Duration::from_secs(180),
        }
    }
}

/// Which cap stopped the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaReason {
    /// A single declared wait was above `max_wait`.
    WaitTooLong,
    /// Accumulated waiting would pass `max_total_wait`.
    TotalWaitExceeded,
    /// `max_retries` retries were already spent.
    RetriesExhausted,
}

impl fmt::Display for QuotaReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitTooLong => write!(f, "declared wait above per-attempt cap"),
            Self::TotalWaitExceeded => write!(f, "total wait cap reached"),
            Self::RetriesExhausted => write!(f, "retry limit reached"),
        }
    }
}

/// Error returned by [`RetryExecutor::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// One of the caps was hit while the upstream kept signalling backoff.
    #[error(
        "quota exceeded: {reason} (attempts: {attempts}, waited: {}s, requested: {}s)",
        waited.as_secs_f64(),
        requested.as_secs_f64()
    )]
    QuotaExceeded {
        /// Cap that stopped the executor.
        reason: QuotaReason,
        /// Number of times the action ran.
        attempts: u32,
        /// Total time slept during this call.
        waited: Duration,
        /// The wait declared by the last quota signal.
        requested: Duration,
    },

    /// A non-quota error from the action, passed through untouched.
    #[error(transparent)]
    Inner(E),
}

impl<E> RetryError<E> {
    /// Returns `true` for [`RetryError::QuotaExceeded`].
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Returns the wrapped action error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::QuotaExceeded { .. } => None,
        }
    }
}

/// Runs actions with bounded sleep-and-retry on quota signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates an executor with the given caps.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the active caps.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `action` until it succeeds, fails with a non-quota error, or a
    /// cap is hit.
    ///
    /// The declared wait is trusted verbatim: no jitter, no exponential
    /// growth.
    pub async fn execute<T, E, F, Fut>(&self, mut action: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryAfter,
    {
        let mut attempts: u32 = 0;
        let mut retries: u32 = 0;
        let mut waited = Duration::ZERO;

        loop {
            attempts += 1;
            let err = match action().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(attempts, waited_ms = waited.as_millis() as u64, "Action succeeded after backoff");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let Some(wait) = err.retry_after() else {
                return Err(RetryError::Inner(err));
            };

            let exceeded = |reason| RetryError::QuotaExceeded {
                reason,
                attempts,
                waited,
                requested: wait,
            };

            if wait > self.policy.max_wait {
                warn!(
                    requested_secs = wait.as_secs_f64(),
                    cap_secs = self.policy.max_wait.as_secs_f64(),
                    "Declared backoff above per-attempt cap, giving up"
                );
                return Err(exceeded(QuotaReason::WaitTooLong));
            }
            if retries >= self.policy.max_retries {
                warn!(attempts, "Retry limit reached while rate limited");
                return Err(exceeded(QuotaReason::RetriesExhausted));
            }
            if waited + wait > self.policy.max_total_wait {
                warn!(
                    waited_secs = waited.as_secs_f64(),
                    requested_secs = wait.as_secs_f64(),
                    "Total backoff cap reached, giving up"
                );
                return Err(exceeded(QuotaReason::TotalWaitExceeded));
            }

            warn!(
                wait_secs = wait.as_secs_f64(),
                attempt = attempts,
                "Rate limited upstream, sleeping before retry"
            );
            tokio::time::sleep(wait).await;
            waited += wait;
            retries += 1;
        }
    }
}
