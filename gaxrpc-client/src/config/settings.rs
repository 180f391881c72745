//! Stock settings shared by generated clients.

use std::time::Duration;

use crate::{BackoffPolicy, CallError, CallPolicy, Expiration, RetryPolicy};

/// Default values used by generated service settings.
pub mod defaults {
    use std::time::Duration;

    /// First delay between retries.
    pub const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);
    /// Upper bound on the delay between retries.
    pub const RETRY_MAX_DELAY: Duration = Duration::from_millis(60_000);
    pub const RETRY_MULTIPLIER: f64 = 1.3;

    /// Timeout of the first attempt.
    pub const TIMEOUT_INITIAL: Duration = Duration::from_millis(60_000);
    /// Upper bound on any single attempt's timeout.
    pub const TIMEOUT_MAX: Duration = Duration::from_millis(60_000);
    pub const TIMEOUT_MULTIPLIER: f64 = 1.0;

    /// Overall budget for one logical call, retries included.
    pub const TOTAL_EXPIRATION: Duration = Duration::from_millis(600_000);

    /// Messages that may wait in a duplex writer's queue.
    pub const STREAM_BUFFER_CAPACITY: usize = 100;

    pub const POLL_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);
    pub const POLL_INITIAL_DELAY: Duration = Duration::from_secs(20);
    pub const POLL_MAX_DELAY: Duration = Duration::from_secs(60);
    pub const POLL_MULTIPLIER: f64 = 1.5;
}

/// The default retry backoff: 100ms growing by 1.3x up to 60s.
pub fn default_retry_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: defaults::RETRY_INITIAL_DELAY,
        max_delay: defaults::RETRY_MAX_DELAY,
        multiplier: defaults::RETRY_MULTIPLIER,
    }
}

/// The default timeout backoff: a flat 60s per attempt.
pub fn default_timeout_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: defaults::TIMEOUT_INITIAL,
        max_delay: defaults::TIMEOUT_MAX,
        multiplier: defaults::TIMEOUT_MULTIPLIER,
    }
}

impl RetryPolicy {
    /// Default policy for idempotent methods.
    pub fn idempotent() -> Self {
        RetryPolicy::new(
            default_retry_backoff(),
            default_timeout_backoff(),
            Expiration::Timeout(defaults::TOTAL_EXPIRATION),
        )
    }

    /// Default policy for non-idempotent methods: same timing, never retries.
    pub fn non_idempotent() -> Self {
        Self::idempotent().with_retry_codes(&[])
    }
}

impl CallPolicy {
    /// Base policy for an idempotent method.
    pub fn idempotent() -> Self {
        CallPolicy::new().with_retry(RetryPolicy::idempotent())
    }

    /// Base policy for a non-idempotent method.
    pub fn non_idempotent() -> Self {
        CallPolicy::new().with_retry(RetryPolicy::non_idempotent())
    }
}

/// Settings for bidirectional streaming calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamingSettings {
    buffer_capacity: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: defaults::STREAM_BUFFER_CAPACITY,
        }
    }
}

impl StreamingSettings {
    /// Fails if `buffer_capacity` is zero.
    pub fn new(buffer_capacity: usize) -> Result<Self, CallError> {
        if buffer_capacity == 0 {
            return Err(CallError::invalid_configuration(
                "stream buffer capacity must be at least 1",
            ));
        }
        Ok(Self { buffer_capacity })
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

/// How long and how often to poll a long-running operation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollSettings {
    expiration: Expiration,
    backoff: BackoffPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            expiration: Expiration::Timeout(defaults::POLL_EXPIRATION),
            backoff: BackoffPolicy {
                initial_delay: defaults::POLL_INITIAL_DELAY,
                max_delay: defaults::POLL_MAX_DELAY,
                multiplier: defaults::POLL_MULTIPLIER,
            },
        }
    }
}

impl PollSettings {
    pub fn new(expiration: Expiration, backoff: BackoffPolicy) -> Self {
        Self {
            expiration,
            backoff,
        }
    }

    /// Poll at a fixed interval until `timeout` elapses.
    pub fn fixed(interval: Duration, timeout: Duration) -> Result<Self, CallError> {
        Ok(Self::new(
            Expiration::Timeout(timeout),
            BackoffPolicy::constant(interval)?,
        ))
    }

    pub fn expiration(&self) -> Expiration {
        self.expiration
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }
}
