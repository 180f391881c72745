//! Deterministic exponential backoff.
//!
//! A [`BackoffPolicy`] maps an attempt index to a delay:
//! `delay(n) = min(initial_delay * multiplier^n, max_delay)`.
//!
//! The same type drives two independent sequences in a
//! [`RetryPolicy`](crate::RetryPolicy): the spacing between retries and the
//! growth of the per-attempt timeout. There is no jitter, so retry timing is
//! reproducible.

use std::time::Duration;

use crate::CallError;

/// Geometric delay sequence capped at a maximum.
///
/// # Example
///
/// ```
/// use gaxrpc_client::BackoffPolicy;
/// use std::time::Duration;
///
/// let backoff = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 2.0)?;
/// assert_eq!(backoff.delay(0), Duration::from_millis(100));
/// assert_eq!(backoff.delay(2), Duration::from_millis(400));
/// assert_eq!(backoff.delay(10), Duration::from_secs(1));
/// # Ok::<(), gaxrpc_client::CallError>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub(crate) initial_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) multiplier: f64,
}

impl BackoffPolicy {
    /// Create a backoff policy.
    ///
    /// Fails with [`CallError::InvalidConfiguration`] unless
    /// `initial_delay > 0`, `max_delay >= initial_delay` and `multiplier >= 1`.
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Result<Self, CallError> {
        if initial_delay.is_zero() {
            return Err(CallError::invalid_configuration(
                "initial_delay must be greater than zero",
            ));
        }
        if max_delay < initial_delay {
            return Err(CallError::invalid_configuration(
                "max_delay must not be less than initial_delay",
            ));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(CallError::invalid_configuration(
                "multiplier must be a finite value >= 1.0",
            ));
        }
        Ok(Self {
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// A policy that always yields `delay`.
    pub fn constant(delay: Duration) -> Result<Self, CallError> {
        Self::new(delay, delay, 1.0)
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// The delay for the zero-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        // Computed in nanoseconds so that exact products stay exact.
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        if nanos < u64::MAX as f64 {
            return Duration::from_nanos(nanos.round() as u64).min(self.max_delay);
        }
        // Beyond u64 nanoseconds (about 584 years).
        Duration::try_from_secs_f64(nanos / 1e9).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}
