//! Runtime shared by the methods of a generated client.
//!
//! A [`ClientRuntime`] holds the pieces every call needs (clock, scheduler,
//! default streaming and poll settings) and builds the per-method call
//! objects from them.

use std::sync::Arc;

use gaxrpc_core::{GetOperationRequest, OperationSnapshot};

use crate::client::{ApiCall, LongRunningCall, StreamingCall};
use crate::clock::{Clock, Scheduler, SystemClock, TokioScheduler};
use crate::executor::Executor;
use crate::operation::OperationsClient;
use crate::transport::{DuplexTransport, UnaryTransport};
use crate::{CallPolicy, PollSettings, StreamingSettings};

/// Shared runtime for one generated client.
///
/// # Example
///
/// ```ignore
/// use gaxrpc_client::{CallPolicy, ClientRuntime};
///
/// let runtime = ClientRuntime::new();
///
/// let get_book = runtime.unary("library.Library/GetBook", http.clone(), CallPolicy::idempotent());
/// let operations = runtime.operations(http.clone());
/// let export = runtime.long_running(
///     "library.Library/ExportBooks",
///     http.clone(),
///     CallPolicy::non_idempotent(),
///     operations,
/// );
/// ```
#[derive(Clone, Debug, Default)]
pub struct ClientRuntime {
    executor: Executor,
    streaming_settings: StreamingSettings,
    poll_settings: PollSettings,
}

impl ClientRuntime {
    /// A runtime on tokio's clock with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ClientRuntimeBuilder {
        ClientRuntimeBuilder::new()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn streaming_settings(&self) -> &StreamingSettings {
        &self.streaming_settings
    }

    pub fn poll_settings(&self) -> &PollSettings {
        &self.poll_settings
    }

    /// A unary method.
    pub fn unary<Req, Res, T>(
        &self,
        method: &'static str,
        transport: T,
        base_policy: CallPolicy,
    ) -> ApiCall<Req, Res>
    where
        T: UnaryTransport<Req, Res> + 'static,
    {
        ApiCall::new(method, transport, base_policy, self.executor.clone())
    }

    /// A client for the GetOperation method, using the runtime's poll
    /// settings and the idempotent base policy.
    pub fn operations<T, R>(&self, transport: R) -> OperationsClient<T>
    where
        R: UnaryTransport<GetOperationRequest, OperationSnapshot<T>> + 'static,
    {
        OperationsClient::new(transport, self.executor.clone()).with_poll_settings(self.poll_settings)
    }

    /// A method that starts a long-running operation tracked by `operations`.
    pub fn long_running<Req, T, R>(
        &self,
        method: &'static str,
        transport: R,
        base_policy: CallPolicy,
        operations: OperationsClient<T>,
    ) -> LongRunningCall<Req, T>
    where
        R: UnaryTransport<Req, OperationSnapshot<T>> + 'static,
    {
        LongRunningCall::new(self.unary(method, transport, base_policy), operations)
    }

    /// A bidirectional streaming method using the runtime's streaming
    /// settings.
    pub fn streaming<Req, Res, T>(
        &self,
        method: &'static str,
        transport: T,
        base_policy: CallPolicy,
    ) -> StreamingCall<Req, Res>
    where
        T: DuplexTransport<Req, Res> + 'static,
    {
        StreamingCall::new(
            method,
            transport,
            base_policy,
            self.streaming_settings,
            self.executor.clone(),
        )
    }
}

/// Builder for a [`ClientRuntime`].
///
/// # Example
///
/// ```ignore
/// let runtime = ClientRuntime::builder()
///     .streaming_settings(StreamingSettings::new(16)?)
///     .poll_settings(PollSettings::fixed(Duration::from_secs(5), Duration::from_secs(300))?)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct ClientRuntimeBuilder {
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    streaming_settings: StreamingSettings,
    poll_settings: PollSettings,
}

impl ClientRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom time source, typically a fake in tests.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Use a custom scheduler for backoff and poll waits.
    pub fn scheduler<S: Scheduler + 'static>(mut self, scheduler: S) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn streaming_settings(mut self, settings: StreamingSettings) -> Self {
        self.streaming_settings = settings;
        self
    }

    pub fn poll_settings(mut self, settings: PollSettings) -> Self {
        self.poll_settings = settings;
        self
    }

    pub fn build(self) -> ClientRuntime {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let scheduler = self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler));
        ClientRuntime {
            executor: Executor::new(clock, scheduler),
            streaming_settings: self.streaming_settings,
            poll_settings: self.poll_settings,
        }
    }
}
