//! Unary call execution.
//!
//! [`Executor::execute`] turns one logical call into a sequence of transport
//! attempts governed by a [`CallPolicy`]:
//!
//! 1. The overall deadline is resolved once, when the call starts.
//! 2. Each attempt gets a timeout: the policy's explicit timeout, or the
//!    retry policy's timeout backoff for that attempt, never extending past
//!    the deadline.
//! 3. A failed attempt is retried only if the retry predicate accepts it and
//!    the next backoff delay still ends before the deadline.
//!
//! Every wait observes the policy's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use gaxrpc_core::Status;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, Scheduler, SystemClock, TokioScheduler};
use crate::transport::UnaryTransport;
use crate::{CallError, CallPolicy};

#[cfg(feature = "tracing")]
use tracing::Instrument;

/// Bookkeeping for one executor invocation.
#[derive(Debug)]
struct Attempt {
    /// Zero-based index of the attempt about to run, or that just ran.
    number: u32,
    start: Instant,
    last_failure: Option<Status>,
}

impl Attempt {
    fn new(start: Instant) -> Self {
        Self {
            number: 0,
            start,
            last_failure: None,
        }
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }

    fn into_error(self, now: Instant) -> CallError {
        let elapsed = self.elapsed(now);
        CallError::RpcFailed {
            status: self
                .last_failure
                .unwrap_or_else(|| Status::unknown("call failed without a status")),
            attempts: self.number + 1,
            elapsed,
        }
    }
}

/// Runs unary calls against a [`UnaryTransport`].
///
/// Cheap to clone; clones share the same clock and scheduler.
#[derive(Clone, Debug)]
pub struct Executor {
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(TokioScheduler))
    }
}

impl Executor {
    pub fn new(clock: Arc<dyn Clock>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { clock, scheduler }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Execute one logical call.
    ///
    /// Returns the first successful response. Fails with
    /// [`CallError::RpcFailed`] carrying the last attempt's status when the
    /// failure is not retryable or the deadline leaves no room for another
    /// attempt, and with [`CallError::Cancelled`] as soon as the policy's
    /// cancellation token fires.
    pub async fn execute<Req, Res, T>(
        &self,
        method: &str,
        transport: &T,
        request: &Req,
        policy: &CallPolicy,
    ) -> Result<Res, CallError>
    where
        T: UnaryTransport<Req, Res> + ?Sized,
        Req: Sync,
    {
        let call = self.run(transport, request, policy);

        #[cfg(feature = "tracing")]
        let call = call.instrument(tracing::info_span!(
            "rpc.call",
            rpc.method = %method,
            rpc.type = "unary",
            otel.kind = "client",
        ));
        #[cfg(not(feature = "tracing"))]
        let _ = method;

        call.await
    }

    async fn run<Req, Res, T>(
        &self,
        transport: &T,
        request: &Req,
        policy: &CallPolicy,
    ) -> Result<Res, CallError>
    where
        T: UnaryTransport<Req, Res> + ?Sized,
        Req: Sync,
    {
        policy.validate()?;

        let cancel = policy.cancellation_token();
        let retry = policy.retry();
        let mut attempt = Attempt::new(self.clock.now());
        let deadline = retry.and_then(|r| r.total_expiration().deadline_from(attempt.start));

        loop {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }

            let timeout = self.attempt_timeout(policy, attempt.number, deadline);
            let status = match self.attempt(transport, request, timeout, &cancel).await? {
                Ok(response) => return Ok(response),
                Err(status) => status,
            };

            let now = self.clock.now();
            let Some(retry) = retry.filter(|r| r.is_retryable(&status)) else {
                attempt.last_failure = Some(status);
                return Err(attempt.into_error(now));
            };

            let delay = retry.backoff().delay(attempt.number);
            let out_of_time = match (deadline, now.checked_add(delay)) {
                (None, _) => false,
                (Some(deadline), Some(resume)) => resume > deadline,
                (Some(_), None) => true,
            };
            if out_of_time {
                attempt.last_failure = Some(status);
                return Err(attempt.into_error(now));
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                code = %status.code(),
                attempt = attempt.number + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient error"
            );

            attempt.last_failure = Some(status);
            self.scheduler.sleep(delay, &cancel).await?;
            attempt.number += 1;
        }
    }

    fn attempt_timeout(
        &self,
        policy: &CallPolicy,
        attempt: u32,
        deadline: Option<Instant>,
    ) -> Option<Duration> {
        let timeout = policy.timeout().or_else(|| {
            policy
                .retry()
                .map(|retry| retry.timeout_backoff().delay(attempt))
        });
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(self.clock.now());
                Some(timeout.map_or(remaining, |t| t.min(remaining)))
            }
            None => timeout,
        }
    }

    /// Run one attempt, racing it against its timeout and the cancellation
    /// token. The outer error is reserved for cancellation.
    async fn attempt<Req, Res, T>(
        &self,
        transport: &T,
        request: &Req,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Result<Res, Status>, CallError>
    where
        T: UnaryTransport<Req, Res> + ?Sized,
        Req: Sync,
    {
        let call = transport.attempt(request, timeout, cancel);
        let expired = async {
            match timeout {
                Some(timeout) => self.scheduler.sleep(timeout, cancel).await,
                None => {
                    cancel.cancelled().await;
                    Err(CallError::Cancelled)
                }
            }
        };

        tokio::select! {
            biased;

            result = call => Ok(result),
            expired = expired => {
                expired?;
                let timeout = timeout.unwrap_or_default();
                Ok(Err(Status::deadline_exceeded(format!(
                    "attempt timed out after {:?}",
                    timeout
                ))))
            }
        }
    }
}
