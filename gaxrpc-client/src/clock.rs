//! Time source and delay scheduling.
//!
//! Deadlines are computed from a [`Clock`] and every wait goes through a
//! [`Scheduler`], so both can be replaced in tests. The defaults are backed
//! by tokio's timer, which also makes them deterministic under
//! `tokio::time::pause()`.

use std::fmt::Debug;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::CallError;

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Schedules cancellable delays.
pub trait Scheduler: Send + Sync + Debug {
    /// Suspend for `delay`.
    ///
    /// Resolves to [`CallError::Cancelled`] as soon as `cancel` fires, or
    /// immediately if it has already fired.
    fn sleep<'a>(
        &'a self,
        delay: Duration,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), CallError>>;
}

/// [`Clock`] reading tokio's monotonic time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// [`Scheduler`] backed by `tokio::time::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn sleep<'a>(
        &'a self,
        delay: Duration,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), CallError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }
            tokio::select! {
                biased;

                _ = cancel.cancelled() => Err(CallError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            }
        })
    }
}
