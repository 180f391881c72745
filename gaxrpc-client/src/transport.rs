//! Transport capabilities consumed by the runtime.
//!
//! The runtime never touches the wire. A generated client plugs in one
//! implementation per transport:
//!
//! - [`UnaryTransport`]: a single request/response round trip
//! - [`DuplexTransport`]: opens a bidirectional stream, returning a
//!   [`DuplexSink`] for the send side and a stream of responses
//!
//! Any closure of the right shape is also a [`UnaryTransport`], which keeps
//! test fakes short.
//!
//! Failures are reported as a [`Status`]; the runtime decides whether they
//! are retried.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use gaxrpc_core::Status;
use tokio_util::sync::CancellationToken;

/// One unary attempt against a remote service.
pub trait UnaryTransport<Req, Res>: Send + Sync {
    /// Send `request` once.
    ///
    /// `timeout` is the budget for this attempt, if any. The runtime also
    /// enforces it, so implementations may treat it as advisory (for example
    /// by forwarding it as a wire deadline).
    fn attempt<'a>(
        &'a self,
        request: &'a Req,
        timeout: Option<Duration>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Res, Status>>;
}

impl<Req, Res, F> UnaryTransport<Req, Res> for F
where
    F: Fn(&Req, Option<Duration>) -> BoxFuture<'static, Result<Res, Status>> + Send + Sync,
{
    fn attempt<'a>(
        &'a self,
        request: &'a Req,
        timeout: Option<Duration>,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Res, Status>> {
        self(request, timeout)
    }
}

/// Send side of an open duplex stream.
pub trait DuplexSink<Req>: Send {
    /// Write one message to the stream.
    fn send(&mut self, message: Req) -> BoxFuture<'_, Result<(), Status>>;

    /// Half-close the send side; no further messages follow.
    fn close_send(&mut self) -> BoxFuture<'_, Result<(), Status>>;
}

/// Responses arriving on an open duplex stream.
pub type ResponseItems<Res> = BoxStream<'static, Result<Res, Status>>;

/// An open duplex stream: the send half and the response half.
pub type DuplexChannel<Req, Res> = (Box<dyn DuplexSink<Req>>, ResponseItems<Res>);

/// Opens bidirectional streams.
pub trait DuplexTransport<Req, Res>: Send + Sync {
    fn open<'a>(
        &'a self,
        timeout: Option<Duration>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<DuplexChannel<Req, Res>, Status>>;
}

impl<Req, Res, T> DuplexTransport<Req, Res> for Arc<T>
where
    T: DuplexTransport<Req, Res> + ?Sized,
{
    fn open<'a>(
        &'a self,
        timeout: Option<Duration>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<DuplexChannel<Req, Res>, Status>> {
        (**self).open(timeout, cancel)
    }
}
