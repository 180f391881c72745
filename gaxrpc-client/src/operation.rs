//! Long-running operations.
//!
//! An [`Operation`] is a client-side view of a server-tracked job. It moves
//! from running to done (successfully or with a failure) only by polling:
//! every poll produces a new handle from a fresh server snapshot, and the old
//! handle is left as it was.
//!
//! Polling goes through an [`OperationsClient`], which owns the GetOperation
//! transport and its base [`CallPolicy`]. Each status fetch is an ordinary
//! unary call and is retried by the executor like any other.
//!
//! # Example
//!
//! ```ignore
//! let operation = client.create_recognizer(request, None).await?;
//! let finished = operation.poll_until_complete(None, None).await?;
//! match finished.into_result() {
//!     Some(Ok(response)) => println!("done: {:?}", response),
//!     Some(Err(status)) => eprintln!("operation failed: {}", status),
//!     None => unreachable!("poll_until_complete only returns done operations"),
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use gaxrpc_core::{GetOperationRequest, OperationOutcome, OperationSnapshot, Status};

use crate::executor::Executor;
use crate::transport::UnaryTransport;
use crate::{CallError, CallPolicy, PollSettings};

/// Transport used to fetch operation snapshots.
pub type GetOperationTransport<T> =
    dyn UnaryTransport<GetOperationRequest, OperationSnapshot<T>>;

/// Fetches the state of long-running operations.
pub struct OperationsClient<T> {
    transport: Arc<GetOperationTransport<T>>,
    base_policy: CallPolicy,
    poll_settings: PollSettings,
    executor: Executor,
}

impl<T> Clone for OperationsClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            base_policy: self.base_policy.clone(),
            poll_settings: self.poll_settings,
            executor: self.executor.clone(),
        }
    }
}

impl<T> fmt::Debug for OperationsClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationsClient")
            .field("base_policy", &self.base_policy)
            .field("poll_settings", &self.poll_settings)
            .finish_non_exhaustive()
    }
}

impl<T> OperationsClient<T> {
    /// Create a client with the idempotent base policy and default polling.
    pub fn new<R>(transport: R, executor: Executor) -> Self
    where
        R: UnaryTransport<GetOperationRequest, OperationSnapshot<T>> + 'static,
    {
        Self {
            transport: Arc::new(transport),
            base_policy: CallPolicy::idempotent(),
            poll_settings: PollSettings::default(),
            executor,
        }
    }

    /// Replace the base policy used for every GetOperation call.
    pub fn with_base_policy(mut self, policy: CallPolicy) -> Self {
        self.base_policy = policy;
        self
    }

    /// Replace the poll settings handed to operations created by this client.
    pub fn with_poll_settings(mut self, settings: PollSettings) -> Self {
        self.poll_settings = settings;
        self
    }

    pub fn base_policy(&self) -> &CallPolicy {
        &self.base_policy
    }

    pub fn poll_settings(&self) -> &PollSettings {
        &self.poll_settings
    }

    /// The policy for one GetOperation call: the base policy merged with
    /// `overrides`.
    pub fn effective_get_operation_policy(&self, overrides: Option<&CallPolicy>) -> CallPolicy {
        self.base_policy.merge(overrides)
    }

    /// Fetch the current snapshot of the named operation.
    pub async fn get_operation(
        &self,
        name: &str,
        overrides: Option<&CallPolicy>,
    ) -> Result<OperationSnapshot<T>, CallError> {
        let policy = self.effective_get_operation_policy(overrides);
        self.fetch(name, &policy).await
    }

    /// Rebuild a handle for an operation known only by name, for example one
    /// persisted across restarts.
    pub async fn poll_once_from_name(
        &self,
        name: &str,
        overrides: Option<&CallPolicy>,
    ) -> Result<Operation<T>, CallError> {
        let snapshot = self.get_operation(name, overrides).await?;
        Ok(Operation::from_snapshot(snapshot, self.clone()))
    }

    async fn fetch(&self, name: &str, policy: &CallPolicy) -> Result<OperationSnapshot<T>, CallError> {
        let request = GetOperationRequest::new(name);
        self.executor
            .execute("GetOperation", &*self.transport, &request, policy)
            .await
    }
}

#[derive(Clone, Debug, PartialEq)]
enum OperationState<T> {
    Running,
    Succeeded(T),
    Failed(Status),
}

/// Handle to a long-running operation.
pub struct Operation<T> {
    name: String,
    state: OperationState<T>,
    metadata: Option<serde_json::Value>,
    poll_settings: PollSettings,
    client: OperationsClient<T>,
}

impl<T: fmt::Debug> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("metadata", &self.metadata)
            .field("poll_settings", &self.poll_settings)
            .finish()
    }
}

impl<T> Operation<T> {
    /// Wrap a snapshot, typically the response of the call that started the
    /// operation.
    ///
    /// A snapshot marked done without an outcome is treated as failed with
    /// an `Unknown` status.
    pub fn from_snapshot(snapshot: OperationSnapshot<T>, client: OperationsClient<T>) -> Self {
        let state = match (snapshot.done, snapshot.outcome) {
            (false, _) => OperationState::Running,
            (true, Some(OperationOutcome::Response(response))) => {
                OperationState::Succeeded(response)
            }
            (true, Some(OperationOutcome::Error(status))) => OperationState::Failed(status),
            (true, None) => OperationState::Failed(Status::unknown(
                "operation completed without a response or error",
            )),
        };
        Self {
            name: snapshot.name,
            state,
            metadata: snapshot.metadata,
            poll_settings: client.poll_settings,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_done(&self) -> bool {
        !matches!(self.state, OperationState::Running)
    }

    /// Whether the operation completed with a failure.
    pub fn is_faulted(&self) -> bool {
        matches!(self.state, OperationState::Failed(_))
    }

    /// The outcome, or `None` while running.
    pub fn result(&self) -> Option<Result<&T, &Status>> {
        match &self.state {
            OperationState::Running => None,
            OperationState::Succeeded(response) => Some(Ok(response)),
            OperationState::Failed(status) => Some(Err(status)),
        }
    }

    pub fn response(&self) -> Option<&T> {
        self.result().and_then(Result::ok)
    }

    pub fn error(&self) -> Option<&Status> {
        self.result().and_then(Result::err)
    }

    /// Progress metadata from the latest snapshot.
    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn poll_settings(&self) -> &PollSettings {
        &self.poll_settings
    }

    /// Use `settings` when this handle is polled to completion.
    pub fn with_poll_settings(mut self, settings: PollSettings) -> Self {
        self.poll_settings = settings;
        self
    }

    pub fn into_result(self) -> Option<Result<T, Status>> {
        match self.state {
            OperationState::Running => None,
            OperationState::Succeeded(response) => Some(Ok(response)),
            OperationState::Failed(status) => Some(Err(status)),
        }
    }

    /// Fetch the operation's state once.
    ///
    /// Returns a new handle; `self` is unchanged.
    pub async fn poll_once(&self, overrides: Option<&CallPolicy>) -> Result<Operation<T>, CallError> {
        let policy = self.client.effective_get_operation_policy(overrides);
        self.refresh(&policy).await
    }

    /// Poll until the operation is done.
    ///
    /// An already-done handle is returned as is. Otherwise the first poll is
    /// immediate and later polls are spaced by the poll backoff. Polls that
    /// fail at the transport are skipped; the loop gives up with
    /// [`CallError::OperationTimeout`] once the next wait would pass the poll
    /// expiration. Each poll's own retries are bounded by that expiration
    /// too. A failed operation is returned as data.
    ///
    /// `settings` defaults to the handle's poll settings.
    pub async fn poll_until_complete(
        self,
        settings: Option<&PollSettings>,
        overrides: Option<&CallPolicy>,
    ) -> Result<Operation<T>, CallError> {
        if self.is_done() {
            return Ok(self);
        }

        let settings = settings.copied().unwrap_or(self.poll_settings);
        let policy = self.client.effective_get_operation_policy(overrides);
        let cancel = policy.cancellation_token();
        let clock = Arc::clone(self.client.executor.clock());
        let scheduler = Arc::clone(self.client.executor.scheduler());

        let start = clock.now();
        let deadline = settings.expiration().deadline_from(start);
        let mut current = self;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            // A single poll may retry, but never past the poll deadline.
            let poll_policy = match deadline {
                Some(deadline) => policy.clone().with_earlier_deadline(deadline, clock.now()),
                None => policy.clone(),
            };
            match current.refresh(&poll_policy).await {
                Ok(next) if next.is_done() => return Ok(next.with_poll_settings(settings)),
                Ok(next) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(operation = %next.name, polls, "operation still running");
                    current = next;
                }
                Err(CallError::RpcFailed { status, .. }) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        operation = %current.name,
                        polls,
                        error = %status,
                        "operation poll failed"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = status;
                }
                Err(err) => return Err(err),
            }

            let delay = settings.backoff().delay(polls - 1);
            let now = clock.now();
            let out_of_time = match (deadline, now.checked_add(delay)) {
                (None, _) => false,
                (Some(deadline), Some(resume)) => resume > deadline,
                (Some(_), None) => true,
            };
            if out_of_time {
                return Err(CallError::OperationTimeout {
                    name: current.name,
                    polls,
                    elapsed: now.saturating_duration_since(start),
                });
            }
            scheduler.sleep(delay, &cancel).await?;
        }
    }

    async fn refresh(&self, policy: &CallPolicy) -> Result<Operation<T>, CallError> {
        let mut snapshot = self.client.fetch(&self.name, policy).await?;
        if snapshot.name.is_empty() {
            snapshot.name.clone_from(&self.name);
        }
        let mut next = Operation::from_snapshot(snapshot, self.client.clone());
        next.poll_settings = self.poll_settings;
        Ok(next)
    }
}
