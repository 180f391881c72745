//! Call runtime for generated RPC clients.
//!
//! This crate sits between a generated service client and a transport. The
//! transport knows how to send one request or open one stream; this crate
//! decides how many times to try, how long each try may take, when to give
//! up, and how to keep streams fed.
//!
//! ## Features
//!
//! - Unary calls with retries, per-attempt timeouts and an overall deadline
//! - Long-running operations: polling with backoff until done
//! - Bidirectional streams with a bounded, ordered write buffer
//! - Per-call policy overrides and request transforms
//! - Cooperative cancellation at every wait
//!
//! ## Unary Example
//!
//! ```ignore
//! use gaxrpc_client::{CallPolicy, ClientRuntime};
//! use std::time::Duration;
//!
//! let runtime = ClientRuntime::new();
//! let get_book = runtime.unary("library.Library/GetBook", transport, CallPolicy::idempotent());
//!
//! // Uses the method's base policy.
//! let book = get_book.call(request.clone(), None).await?;
//!
//! // Override the per-attempt timeout for this call only.
//! let options = CallPolicy::new().with_timeout(Duration::from_secs(5));
//! let book = get_book.call(request, Some(&options)).await?;
//! ```
//!
//! ## Retry Behavior
//!
//! A failed attempt is retried when the [`RetryPolicy`]'s predicate accepts
//! its [`Status`] and the next backoff delay still ends before the deadline.
//! Two independent [`BackoffPolicy`] sequences are involved: one spaces the
//! retries, the other grows each attempt's timeout.
//!
//! | Preset | Retries | Delay | Attempt timeout | Total |
//! |--------|---------|-------|-----------------|-------|
//! | [`RetryPolicy::idempotent`] | `DeadlineExceeded`, `Unavailable` | 100ms ×1.3 up to 60s | 60s | 600s |
//! | [`RetryPolicy::non_idempotent`] | nothing | - | 60s | 600s |
//!
//! When the runtime gives up, the caller sees [`CallError::RpcFailed`] with
//! the last attempt's status and the number of attempts made.
//!
//! ## Long-Running Operation Example
//!
//! ```ignore
//! let operations = runtime.operations(transport.clone());
//! let export = runtime.long_running(
//!     "library.Library/ExportBooks",
//!     transport,
//!     CallPolicy::non_idempotent(),
//!     operations,
//! );
//!
//! let operation = export.call(request, None).await?;
//! let operation = operation.poll_until_complete(None, None).await?;
//! match operation.into_result() {
//!     Some(Ok(summary)) => println!("exported: {:?}", summary),
//!     Some(Err(status)) => eprintln!("export failed: {}", status),
//!     None => {}
//! }
//! ```
//!
//! ## Bidirectional Streaming Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let converse = runtime.streaming("chat.Chat/Converse", transport, CallPolicy::new());
//! let call = converse.open(None, None).await?;
//! let (writer, mut responses) = call.into_parts();
//!
//! writer.write(ChatMessage::new("hello"), &cancel).await?;
//! writer.write_complete()?;
//!
//! while let Some(reply) = responses.next().await {
//!     println!("reply: {:?}", reply?);
//! }
//! writer.closed().await?;
//! ```
//!
//! ## Cancellation
//!
//! Attach a [`CancellationToken`] with [`CallPolicy::with_cancellation`].
//! Backoff waits, poll waits, in-flight attempts and blocked stream writes
//! all stop as soon as it fires and report [`CallError::Cancelled`].
//!
//! ## Tracing
//!
//! Enable the `tracing` feature to get an `rpc.call` span around each unary
//! call and events for retries, polls and stream write failures.

mod builder;
mod client;
pub mod clock;
pub mod config;
mod error;
mod executor;
mod operation;
mod streaming;
pub mod transport;
mod writer;

pub use builder::{ClientRuntime, ClientRuntimeBuilder};
pub use client::{ApiCall, LongRunningCall, StreamingCall};
pub use clock::{Clock, Scheduler, SystemClock, TokioScheduler};
pub use error::CallError;
pub use executor::Executor;
pub use operation::{GetOperationTransport, Operation, OperationsClient};
pub use streaming::{Drained, DuplexCall, ResponseStream};
pub use transport::{DuplexChannel, DuplexSink, DuplexTransport, ResponseItems, UnaryTransport};
pub use writer::BufferedStreamWriter;

// Re-export from config module
pub use config::{
    BackoffPolicy, CallPolicy, Chain, Expiration, HeaderTransform, PolicyTransform, PollSettings,
    RequestTransform, RetryPolicy, RetryPredicate, StreamingSettings, TransformChain,
    default_retry_backoff, default_timeout_backoff, defaults,
};

// Re-export core types that users need
pub use gaxrpc_core::{
    Code, ErrorDetail, GetOperationRequest, OperationOutcome, OperationSnapshot, Status,
};

// Re-export the cancellation token used throughout the API
pub use tokio_util::sync::CancellationToken;
