//! Buffered writes onto a duplex stream.
//!
//! A duplex stream accepts one physical write at a time. [`BufferedStreamWriter`]
//! lets callers enqueue messages without waiting for each write to finish:
//! messages go into a bounded FIFO queue and a single drainer task writes
//! them to the [`DuplexSink`] in order.
//!
//! The message currently being written still occupies a slot, so a writer
//! with capacity `n` never holds more than `n` messages at once.
//!
//! After [`write_complete`](BufferedStreamWriter::write_complete) no more
//! messages are accepted; everything already queued is written and then the
//! send side is half-closed. A failed physical write stops the drainer and
//! every later call reports the same failure.
//!
//! [`abort`](BufferedStreamWriter::abort) stops the drainer at once, even in
//! the middle of a write that never returns, and discards whatever is queued.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use gaxrpc_core::Status;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::transport::DuplexSink;
use crate::{CallError, StreamingSettings};

struct State<T> {
    queue: VecDeque<T>,
    in_flight: bool,
    completed: bool,
    failure: Option<Status>,
    /// The drainer has exited.
    finished: bool,
}

impl<T> State<T> {
    fn occupied(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight)
    }

    /// Error for a write that can no longer be accepted, if any.
    fn rejection(&self) -> Option<CallError> {
        if let Some(status) = &self.failure {
            return Some(CallError::WriteFailed(status.clone()));
        }
        if self.completed {
            return Some(CallError::QueueClosed);
        }
        None
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    /// Wakes producers waiting for a free slot.
    space: Notify,
    /// Wakes the drainer.
    items: Notify,
    /// Wakes callers of `closed`.
    finished: Notify,
    /// Stops the drainer without waiting for the sink.
    shutdown: CancellationToken,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // A panic while holding the lock cannot leave the state torn: every
        // critical section is a handful of field updates.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded, order-preserving writer for the send side of a duplex stream.
///
/// Dropping the writer completes it, as if
/// [`try_write_complete`](Self::try_write_complete) had been called.
///
/// # Example
///
/// ```ignore
/// let writer = BufferedStreamWriter::new(sink, &StreamingSettings::default());
/// writer.write(first, &cancel).await?;
/// if !writer.try_write(second)? {
///     // Queue full; the message was not enqueued.
/// }
/// writer.write_complete()?;
/// writer.closed().await?;
/// ```
pub struct BufferedStreamWriter<T> {
    shared: Arc<Shared<T>>,
    capacity: usize,
}

impl<T> fmt::Debug for BufferedStreamWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("BufferedStreamWriter")
            .field("capacity", &self.capacity)
            .field("occupied", &state.occupied())
            .field("completed", &state.completed)
            .field("failure", &state.failure)
            .finish()
    }
}

impl<T: Send + 'static> BufferedStreamWriter<T> {
    /// Start a writer draining into `sink`.
    ///
    /// Spawns the drainer on the current tokio runtime.
    pub fn new(sink: Box<dyn DuplexSink<T>>, settings: &StreamingSettings) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(settings.buffer_capacity()),
                in_flight: false,
                completed: false,
                failure: None,
                finished: false,
            }),
            space: Notify::new(),
            items: Notify::new(),
            finished: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(drain(Arc::clone(&shared), sink));
        Self {
            shared,
            capacity: settings.buffer_capacity(),
        }
    }
}

impl<T> BufferedStreamWriter<T> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages queued or being written.
    pub fn pending(&self) -> usize {
        self.shared.lock().occupied()
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().completed
    }

    /// Enqueue `message` if there is room.
    ///
    /// Returns `Ok(false)` without enqueuing (the message is dropped) when the
    /// queue is full. Fails with [`CallError::QueueClosed`] after completion
    /// and [`CallError::WriteFailed`] after a physical write failed.
    pub fn try_write(&self, message: T) -> Result<bool, CallError> {
        let mut state = self.shared.lock();
        if let Some(err) = state.rejection() {
            return Err(err);
        }
        if state.occupied() >= self.capacity {
            return Ok(false);
        }
        state.queue.push_back(message);
        drop(state);
        self.shared.items.notify_one();
        Ok(true)
    }

    /// Enqueue `message`, waiting for room if the queue is full.
    ///
    /// Fails with [`CallError::Cancelled`] if `cancel` fires first; the
    /// message is then not enqueued.
    pub async fn write(&self, message: T, cancel: &CancellationToken) -> Result<(), CallError> {
        loop {
            let space = self.shared.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if let Some(err) = state.rejection() {
                    return Err(err);
                }
                if state.occupied() < self.capacity {
                    state.queue.push_back(message);
                    drop(state);
                    self.shared.items.notify_one();
                    return Ok(());
                }
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                _ = &mut space => {}
            }
        }
    }

    /// Stop accepting messages. Queued messages are still written, then the
    /// send side is half-closed.
    ///
    /// Fails with [`CallError::QueueClosed`] if already completed.
    pub fn write_complete(&self) -> Result<(), CallError> {
        let mut state = self.shared.lock();
        if let Some(err) = state.rejection() {
            return Err(err);
        }
        state.completed = true;
        drop(state);
        self.shared.items.notify_one();
        self.shared.space.notify_waiters();
        Ok(())
    }

    /// Like [`write_complete`](Self::write_complete), but returns `false`
    /// instead of failing when the writer is already completed or failed.
    pub fn try_write_complete(&self) -> bool {
        self.write_complete().is_ok()
    }

    /// Stop the drainer now. Queued messages are discarded, a write in
    /// progress is abandoned and every pending or later call fails with a
    /// `Cancelled` [`CallError::WriteFailed`]. The send side is not
    /// half-closed.
    pub fn abort(&self) {
        self.shared.shutdown.cancel();
    }

    /// Wait for the drainer to finish: every accepted message has been
    /// written and the send side half-closed, or a write failed.
    pub async fn closed(&self) -> Result<(), CallError> {
        loop {
            let finished = self.shared.finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();

            {
                let state = self.shared.lock();
                if state.finished {
                    return match &state.failure {
                        Some(status) => Err(CallError::WriteFailed(status.clone())),
                        None => Ok(()),
                    };
                }
            }

            finished.await;
        }
    }
}

impl<T> Drop for BufferedStreamWriter<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if !state.completed {
            state.completed = true;
            drop(state);
            self.shared.items.notify_one();
        }
    }
}

enum Next<T> {
    Write(T),
    HalfClose,
    Wait,
}

async fn drain<T>(shared: Arc<Shared<T>>, mut sink: Box<dyn DuplexSink<T>>) {
    let shutdown = shared.shutdown.clone();
    loop {
        let next = {
            let mut state = shared.lock();
            match state.queue.pop_front() {
                Some(message) => {
                    state.in_flight = true;
                    Next::Write(message)
                }
                None if state.completed => Next::HalfClose,
                None => Next::Wait,
            }
        };

        match next {
            Next::Wait => {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return aborted(&shared),
                    _ = shared.items.notified() => {}
                }
            }
            Next::Write(message) => {
                let result = tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return aborted(&shared),
                    result = sink.send(message) => result,
                };
                let mut state = shared.lock();
                state.in_flight = false;
                if let Err(status) = result {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %status, "stream write failed");
                    state.failure = Some(status);
                    state.queue.clear();
                    finish(&shared, state);
                    return;
                }
                drop(state);
                shared.space.notify_waiters();
            }
            Next::HalfClose => {
                let result = tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return aborted(&shared),
                    result = sink.close_send() => result,
                };
                let mut state = shared.lock();
                match result {
                    Ok(()) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("stream half-closed");
                    }
                    Err(status) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %status, "stream half-close failed");
                        state.failure = Some(status);
                    }
                }
                finish(&shared, state);
                return;
            }
        }
    }
}

fn aborted<T>(shared: &Shared<T>) {
    #[cfg(feature = "tracing")]
    tracing::debug!("stream writer aborted");
    let mut state = shared.lock();
    state.in_flight = false;
    state.queue.clear();
    if state.failure.is_none() {
        state.failure = Some(Status::cancelled("stream writer aborted"));
    }
    finish(shared, state);
}

fn finish<T>(shared: &Shared<T>, mut state: MutexGuard<'_, State<T>>) {
    state.finished = true;
    drop(state);
    shared.space.notify_waiters();
    shared.finished.notify_waiters();
}
