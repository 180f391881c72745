//! Bidirectional streaming calls.
//!
//! A [`DuplexCall`] pairs a [`BufferedStreamWriter`] for the send side with a
//! [`ResponseStream`] for the receive side. The two halves are independent:
//! callers may keep writing while reading responses, or split the call with
//! [`DuplexCall::into_parts`] and drive each half from its own task.
//!
//! # Cancellation
//!
//! Dropping the [`ResponseStream`] stops receiving. Dropping the writer
//! completes it: queued messages are still written and the send side is
//! half-closed.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use gaxrpc_core::Status;
use tokio_util::sync::CancellationToken;

use crate::clock::{Scheduler, TokioScheduler};
use crate::transport::{DuplexChannel, ResponseItems};
use crate::writer::BufferedStreamWriter;
use crate::{CallError, StreamingSettings, TransformChain};

/// What a [`ResponseStream::drain`] consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Drained {
    pub messages: usize,
    pub failures: usize,
    /// The server ended the stream before the drain was cut short.
    pub finished: bool,
}

/// Responses received on a duplex stream.
///
/// # Example
///
/// ```ignore
/// let mut responses = call.into_parts().1;
///
/// while let Some(result) = responses.next().await {
///     match result {
///         Ok(msg) => println!("Got message: {:?}", msg),
///         Err(status) => eprintln!("Error: {}", status),
///     }
/// }
/// ```
pub struct ResponseStream<T> {
    inner: ResponseItems<T>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T> std::fmt::Debug for ResponseStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl<T> ResponseStream<T> {
    /// Wrap `inner`, timing drains with tokio's timer.
    pub fn new(inner: ResponseItems<T>) -> Self {
        Self {
            inner,
            scheduler: Arc::new(TokioScheduler),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn into_inner(self) -> ResponseItems<T> {
        self.inner
    }

    /// Receive the next response, or `None` once the server has finished.
    pub async fn message(&mut self) -> Option<Result<T, Status>> {
        self.inner.next().await
    }

    /// Discard the remaining responses.
    ///
    /// Stops when the server ends the stream, when `within` elapses or when
    /// `cancel` fires, whichever comes first; only the first sets
    /// [`Drained::finished`].
    pub async fn drain(&mut self, within: Option<Duration>, cancel: &CancellationToken) -> Drained {
        let scheduler = Arc::clone(&self.scheduler);
        let cancel = cancel.clone();
        let cut_short = async move {
            match within {
                Some(limit) => {
                    let _ = scheduler.sleep(limit, &cancel).await;
                }
                None => cancel.cancelled().await,
            }
        };
        tokio::pin!(cut_short);

        let mut drained = Drained::default();
        loop {
            tokio::select! {
                biased;

                _ = &mut cut_short => return drained,
                item = self.inner.next() => match item {
                    Some(Ok(_)) => drained.messages += 1,
                    Some(Err(_)) => drained.failures += 1,
                    None => {
                        drained.finished = true;
                        return drained;
                    }
                },
            }
        }
    }
}

impl<T> Stream for ResponseStream<T> {
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// An open bidirectional streaming call.
///
/// Every outgoing message passes through the call's request transforms
/// before it is queued.
pub struct DuplexCall<Req, Res> {
    writer: BufferedStreamWriter<Req>,
    responses: ResponseStream<Res>,
    transforms: TransformChain<Req>,
}

impl<Req, Res> std::fmt::Debug for DuplexCall<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexCall")
            .field("writer", &self.writer)
            .field("transforms", &self.transforms)
            .finish_non_exhaustive()
    }
}

impl<Req: Send + 'static, Res> DuplexCall<Req, Res> {
    /// Wrap an open channel, starting the writer's drainer.
    pub fn new(
        channel: DuplexChannel<Req, Res>,
        settings: &StreamingSettings,
        transforms: TransformChain<Req>,
    ) -> Self {
        let (sink, responses) = channel;
        Self {
            writer: BufferedStreamWriter::new(sink, settings),
            responses: ResponseStream::new(responses),
            transforms,
        }
    }
}

impl<Req, Res> DuplexCall<Req, Res> {
    /// Time response drains with `scheduler`.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.responses = self.responses.with_scheduler(scheduler);
        self
    }

    /// See [`BufferedStreamWriter::try_write`].
    pub fn try_write(&self, mut message: Req) -> Result<bool, CallError> {
        self.transforms.apply_message(&mut message);
        self.writer.try_write(message)
    }

    /// See [`BufferedStreamWriter::write`].
    pub async fn write(&self, mut message: Req, cancel: &CancellationToken) -> Result<(), CallError> {
        self.transforms.apply_message(&mut message);
        self.writer.write(message, cancel).await
    }

    pub fn write_complete(&self) -> Result<(), CallError> {
        self.writer.write_complete()
    }

    pub fn try_write_complete(&self) -> bool {
        self.writer.try_write_complete()
    }

    /// Wait until the send side is half-closed or has failed.
    pub async fn closed(&self) -> Result<(), CallError> {
        self.writer.closed().await
    }

    /// See [`BufferedStreamWriter::abort`].
    pub fn abort(&self) {
        self.writer.abort()
    }

    pub fn writer(&self) -> &BufferedStreamWriter<Req> {
        &self.writer
    }

    pub fn responses(&mut self) -> &mut ResponseStream<Res> {
        &mut self.responses
    }

    /// Split into the writer and the response stream.
    ///
    /// The returned writer no longer applies the call's transforms.
    pub fn into_parts(self) -> (BufferedStreamWriter<Req>, ResponseStream<Res>) {
        (self.writer, self.responses)
    }
}
