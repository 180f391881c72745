//! Retry configuration for unary calls.
//!
//! A [`RetryPolicy`] bundles:
//! - a [`BackoffPolicy`] spacing consecutive attempts,
//! - a second [`BackoffPolicy`] growing the per-attempt timeout,
//! - an overall [`Expiration`] bounding the whole logical call,
//! - a retry predicate classifying failures as retryable.
//!
//! # Retryable errors
//!
//! The predicate is the only gate. Use [`RetryPolicy::idempotent_filter`]
//! for methods that are safe to replay (retries `DeadlineExceeded` and
//! `Unavailable`) and [`RetryPolicy::non_idempotent_filter`] for methods that
//! must never be replayed.
//!
//! # Example
//!
//! ```
//! use gaxrpc_client::{BackoffPolicy, Code, Expiration, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(
//!     BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(60), 1.3)?,
//!     BackoffPolicy::constant(Duration::from_secs(60))?,
//!     Expiration::timeout(Duration::from_secs(600)),
//! )
//! .with_retry_codes(&[Code::Unavailable]);
//! # Ok::<(), gaxrpc_client::CallError>(())
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gaxrpc_core::{Code, Status};
use tokio::time::Instant;

use crate::BackoffPolicy;

/// Classifies a failure as retryable.
pub type RetryPredicate = Arc<dyn Fn(&Status) -> bool + Send + Sync>;

/// When a logical call must give up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Expiration {
    /// No overall limit.
    #[default]
    None,
    /// Relative to the start of the call.
    Timeout(Duration),
    /// An absolute point in time.
    Deadline(Instant),
}

impl Expiration {
    pub fn timeout(timeout: Duration) -> Self {
        Expiration::Timeout(timeout)
    }

    pub fn deadline(deadline: Instant) -> Self {
        Expiration::Deadline(deadline)
    }

    /// Resolve to an absolute deadline for a call starting at `start`.
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        match *self {
            Expiration::None => None,
            Expiration::Timeout(timeout) => start.checked_add(timeout),
            Expiration::Deadline(deadline) => Some(deadline),
        }
    }

    /// The earlier of this expiration, resolved at `now`, and `deadline`.
    pub fn earlier_than(&self, deadline: Instant, now: Instant) -> Expiration {
        match self.deadline_from(now) {
            Some(own) if own <= deadline => Expiration::Deadline(own),
            _ => Expiration::Deadline(deadline),
        }
    }
}

/// Retry behavior for one logical call. Immutable once built.
#[derive(Clone)]
pub struct RetryPolicy {
    backoff: BackoffPolicy,
    timeout_backoff: BackoffPolicy,
    total_expiration: Expiration,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("backoff", &self.backoff)
            .field("timeout_backoff", &self.timeout_backoff)
            .field("total_expiration", &self.total_expiration)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a policy that retries with the idempotent filter.
    pub fn new(
        backoff: BackoffPolicy,
        timeout_backoff: BackoffPolicy,
        total_expiration: Expiration,
    ) -> Self {
        Self {
            backoff,
            timeout_backoff,
            total_expiration,
            predicate: Self::idempotent_filter(),
        }
    }

    /// Filter retrying exactly the given codes.
    pub fn filter_for_codes(codes: &[Code]) -> RetryPredicate {
        let codes = codes.to_vec();
        Arc::new(move |status: &Status| codes.contains(&status.code()))
    }

    /// Filter for methods that are safe to replay.
    pub fn idempotent_filter() -> RetryPredicate {
        Self::filter_for_codes(&[Code::DeadlineExceeded, Code::Unavailable])
    }

    /// Filter for methods with side effects: never retries.
    pub fn non_idempotent_filter() -> RetryPredicate {
        Self::filter_for_codes(&[])
    }

    /// Replace the retry predicate.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Status) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Retry exactly the given codes.
    pub fn with_retry_codes(mut self, codes: &[Code]) -> Self {
        self.predicate = Self::filter_for_codes(codes);
        self
    }

    pub fn with_total_expiration(mut self, expiration: Expiration) -> Self {
        self.total_expiration = expiration;
        self
    }

    /// Bound the whole call by `deadline` as well as by its own expiration.
    pub fn with_earlier_deadline(mut self, deadline: Instant, now: Instant) -> Self {
        self.total_expiration = self.total_expiration.earlier_than(deadline, now);
        self
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn timeout_backoff(&self) -> &BackoffPolicy {
        &self.timeout_backoff
    }

    pub fn total_expiration(&self) -> Expiration {
        self.total_expiration
    }

    /// Whether `status` may be retried under this policy.
    pub fn is_retryable(&self, status: &Status) -> bool {
        (self.predicate)(status)
    }
}
