//! Per-method call objects used by generated clients.
//!
//! Each RPC method of a generated client owns one of:
//!
//! - [`ApiCall`]: unary request/response with retries
//! - [`LongRunningCall`]: a unary call that starts an [`Operation`]
//! - [`StreamingCall`]: opens bidirectional streams
//!
//! All of them merge the method's base [`CallPolicy`] with the caller's
//! per-call override before doing anything else, and run the method's
//! request transforms on what is about to be sent.

use std::fmt;
use std::sync::Arc;

use gaxrpc_core::OperationSnapshot;

use crate::executor::Executor;
use crate::operation::{Operation, OperationsClient};
use crate::streaming::DuplexCall;
use crate::transport::{DuplexTransport, UnaryTransport};
use crate::{CallError, CallPolicy, RequestTransform, StreamingSettings, TransformChain};

/// A unary RPC method.
///
/// # Example
///
/// ```ignore
/// let get_book = runtime.unary("library.Library/GetBook", transport, CallPolicy::idempotent());
///
/// let book = get_book.call(GetBookRequest { name: "shelves/1/books/2".into() }, None).await?;
///
/// // Tighter timeout for this one call.
/// let options = CallPolicy::new().with_timeout(Duration::from_secs(5));
/// let book = get_book.call(request, Some(&options)).await?;
/// ```
pub struct ApiCall<Req, Res> {
    method: &'static str,
    transport: Arc<dyn UnaryTransport<Req, Res>>,
    base_policy: CallPolicy,
    transforms: TransformChain<Req>,
    executor: Executor,
}

impl<Req, Res> Clone for ApiCall<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            transport: Arc::clone(&self.transport),
            base_policy: self.base_policy.clone(),
            transforms: self.transforms.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<Req, Res> fmt::Debug for ApiCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCall")
            .field("method", &self.method)
            .field("base_policy", &self.base_policy)
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

impl<Req, Res> ApiCall<Req, Res> {
    pub fn new<T>(
        method: &'static str,
        transport: T,
        base_policy: CallPolicy,
        executor: Executor,
    ) -> Self
    where
        T: UnaryTransport<Req, Res> + 'static,
    {
        Self {
            method,
            transport: Arc::new(transport),
            base_policy,
            transforms: TransformChain::new(),
            executor,
        }
    }

    /// Add a request transform; transforms run in the order added.
    pub fn with_transform<T>(mut self, transform: T) -> Self
    where
        T: RequestTransform<Req> + 'static,
    {
        self.transforms.push(transform);
        self
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn base_policy(&self) -> &CallPolicy {
        &self.base_policy
    }

    /// The base policy merged with `overrides`, before transforms run.
    pub fn effective_policy(&self, overrides: Option<&CallPolicy>) -> CallPolicy {
        self.base_policy.merge(overrides)
    }

    /// Send `request`, retrying according to the effective policy.
    pub async fn call(&self, mut request: Req, overrides: Option<&CallPolicy>) -> Result<Res, CallError>
    where
        Req: Sync,
    {
        let mut policy = self.effective_policy(overrides);
        self.transforms.apply(&mut request, &mut policy);
        self.executor
            .execute(self.method, &*self.transport, &request, &policy)
            .await
    }
}

/// A unary method that starts a long-running operation.
pub struct LongRunningCall<Req, T> {
    start: ApiCall<Req, OperationSnapshot<T>>,
    operations: OperationsClient<T>,
}

impl<Req, T> Clone for LongRunningCall<Req, T> {
    fn clone(&self) -> Self {
        Self {
            start: self.start.clone(),
            operations: self.operations.clone(),
        }
    }
}

impl<Req, T> fmt::Debug for LongRunningCall<Req, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LongRunningCall")
            .field("start", &self.start)
            .field("operations", &self.operations)
            .finish()
    }
}

impl<Req, T> LongRunningCall<Req, T> {
    pub fn new(start: ApiCall<Req, OperationSnapshot<T>>, operations: OperationsClient<T>) -> Self {
        Self { start, operations }
    }

    pub fn with_transform<R>(mut self, transform: R) -> Self
    where
        R: RequestTransform<Req> + 'static,
    {
        self.start = self.start.with_transform(transform);
        self
    }

    pub fn operations(&self) -> &OperationsClient<T> {
        &self.operations
    }

    /// Start the operation. The returned handle reflects the server's first
    /// snapshot, which may already be done.
    pub async fn call(
        &self,
        request: Req,
        overrides: Option<&CallPolicy>,
    ) -> Result<Operation<T>, CallError>
    where
        Req: Sync,
    {
        let snapshot = self.start.call(request, overrides).await?;
        Ok(Operation::from_snapshot(snapshot, self.operations.clone()))
    }

    /// Resume tracking an operation started earlier.
    pub async fn poll_once_from_name(
        &self,
        name: &str,
        overrides: Option<&CallPolicy>,
    ) -> Result<Operation<T>, CallError> {
        self.operations.poll_once_from_name(name, overrides).await
    }
}

/// A bidirectional streaming method.
///
/// Each [`open`](Self::open) makes exactly one attempt; broken streams are
/// not reopened.
pub struct StreamingCall<Req, Res> {
    method: &'static str,
    transport: Arc<dyn DuplexTransport<Req, Res>>,
    base_policy: CallPolicy,
    settings: StreamingSettings,
    transforms: TransformChain<Req>,
    executor: Executor,
}

impl<Req, Res> Clone for StreamingCall<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            transport: Arc::clone(&self.transport),
            base_policy: self.base_policy.clone(),
            settings: self.settings,
            transforms: self.transforms.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<Req, Res> fmt::Debug for StreamingCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCall")
            .field("method", &self.method)
            .field("base_policy", &self.base_policy)
            .field("settings", &self.settings)
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

impl<Req, Res> StreamingCall<Req, Res> {
    pub fn new<T>(
        method: &'static str,
        transport: T,
        base_policy: CallPolicy,
        settings: StreamingSettings,
        executor: Executor,
    ) -> Self
    where
        T: DuplexTransport<Req, Res> + 'static,
    {
        Self {
            method,
            transport: Arc::new(transport),
            base_policy,
            settings,
            transforms: TransformChain::new(),
            executor,
        }
    }

    /// Add a transform applied to every outgoing message.
    pub fn with_transform<T>(mut self, transform: T) -> Self
    where
        T: RequestTransform<Req> + 'static,
    {
        self.transforms.push(transform);
        self
    }

    pub fn with_settings(mut self, settings: StreamingSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn settings(&self) -> &StreamingSettings {
        &self.settings
    }

    /// Open a stream.
    ///
    /// The base policy is merged with `overrides` and then passed through
    /// the transforms' policy hooks. Its timeout bounds the open itself; a
    /// failure is reported as [`CallError::RpcFailed`] after one attempt.
    ///
    /// `settings` replaces the method's streaming settings for this stream
    /// only.
    pub async fn open(
        &self,
        overrides: Option<&CallPolicy>,
        settings: Option<&StreamingSettings>,
    ) -> Result<DuplexCall<Req, Res>, CallError>
    where
        Req: Send + 'static,
    {
        let mut policy = self.base_policy.merge(overrides);
        self.transforms.apply_policy(&mut policy);
        policy.validate()?;
        let settings = settings.copied().unwrap_or(self.settings);

        let cancel = policy.cancellation_token();
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        let clock = self.executor.clock();
        let scheduler = self.executor.scheduler();
        let start = clock.now();
        let timeout = policy.timeout();

        let expired = async {
            match timeout {
                Some(timeout) => scheduler.sleep(timeout, &cancel).await,
                None => {
                    cancel.cancelled().await;
                    Err(CallError::Cancelled)
                }
            }
        };

        let opened = tokio::select! {
            biased;

            opened = self.transport.open(timeout, &cancel) => opened,
            expired = expired => {
                expired?;
                Err(gaxrpc_core::Status::deadline_exceeded(format!(
                    "{} did not open within {:?}",
                    self.method,
                    timeout.unwrap_or_default()
                )))
            }
        };

        match opened {
            Ok(channel) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(rpc.method = %self.method, "stream opened");
                Ok(DuplexCall::new(channel, &settings, self.transforms.clone())
                    .with_scheduler(Arc::clone(scheduler)))
            }
            Err(status) => Err(CallError::RpcFailed {
                status,
                attempts: 1,
                elapsed: clock.now().saturating_duration_since(start),
            }),
        }
    }
}
