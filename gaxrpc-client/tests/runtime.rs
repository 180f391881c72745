//! End-to-end tests driving the runtime through fake transports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use gaxrpc_client::{
    BackoffPolicy, CallError, CallPolicy, CancellationToken, ClientRuntime, Clock, Code,
    DuplexChannel, DuplexSink, DuplexTransport, Expiration, OperationSnapshot, RetryPolicy,
    Scheduler, Status, StreamingSettings, UnaryTransport,
};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Virtual time: sleeping advances the clock instantly and is recorded.
#[derive(Clone, Debug)]
struct FakeTime {
    state: Arc<Mutex<(Instant, Vec<Duration>)>>,
}

impl FakeTime {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new((Instant::now(), Vec::new()))),
        }
    }

    fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().1.clone()
    }

    fn runtime(&self) -> ClientRuntime {
        ClientRuntime::builder()
            .clock(self.clone())
            .scheduler(self.clone())
            .build()
    }
}

impl Clock for FakeTime {
    fn now(&self) -> Instant {
        self.state.lock().unwrap().0
    }
}

impl Scheduler for FakeTime {
    fn sleep<'a>(
        &'a self,
        delay: Duration,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), CallError>> {
        async move {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }
            let mut state = self.state.lock().unwrap();
            state.0 += delay;
            state.1.push(delay);
            Ok(())
        }
        .boxed()
    }
}

/// Unary transport replaying a script of results.
#[derive(Clone)]
struct Scripted<Res> {
    script: Arc<Mutex<VecDeque<Result<Res, Status>>>>,
    attempts: Arc<AtomicU32>,
}

impl<Res> Scripted<Res> {
    fn new(script: Vec<Result<Res, Status>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            attempts: Arc::default(),
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<Req, Res> UnaryTransport<Req, Res> for Scripted<Res>
where
    Req: Sync,
    Res: Send + 'static,
{
    fn attempt<'a>(
        &'a self,
        _request: &'a Req,
        _timeout: Option<Duration>,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Res, Status>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Status::internal("script exhausted")));
        async move { next }.boxed()
    }
}

#[tokio::test]
async fn retries_stop_at_first_non_retryable_failure() {
    let time = FakeTime::new();
    let transport = Scripted::<String>::new(vec![
        Err(Status::unavailable("down")),
        Err(Status::unavailable("still down")),
        Err(Status::permission_denied("caller lacks access")),
    ]);
    let call = time.runtime().unary(
        "library.Library/GetBook",
        transport.clone(),
        CallPolicy::idempotent(),
    );

    let err = call.call((), None).await.unwrap_err();

    assert_eq!(transport.attempts(), 3);
    match &err {
        CallError::RpcFailed {
            status, attempts, ..
        } => {
            assert_eq!(status.code(), Code::PermissionDenied);
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        time.sleeps(),
        vec![Duration::from_millis(100), Duration::from_millis(130)]
    );
}

#[tokio::test]
async fn exhausted_budget_is_rpc_failure_not_timeout() {
    let time = FakeTime::new();
    let transport = Scripted::<String>::new(vec![
        Err(Status::unavailable("1")),
        Err(Status::unavailable("2")),
        Ok("never reached".to_string()),
    ]);
    let retry = RetryPolicy::new(
        BackoffPolicy::new(Duration::from_millis(300), Duration::from_secs(10), 2.0).unwrap(),
        BackoffPolicy::constant(Duration::from_secs(1)).unwrap(),
        Expiration::timeout(Duration::from_millis(500)),
    );
    let call = time.runtime().unary(
        "library.Library/GetBook",
        transport.clone(),
        CallPolicy::new().with_retry(retry),
    );

    let err = call.call((), None).await.unwrap_err();

    assert!(matches!(err, CallError::RpcFailed { attempts: 2, .. }));
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(transport.attempts(), 2);
    assert_eq!(time.sleeps(), vec![Duration::from_millis(300)]);
}

#[tokio::test]
async fn per_call_override_replaces_retry_policy() {
    let time = FakeTime::new();
    let transport = Scripted::<String>::new(vec![
        Err(Status::unavailable("down")),
        Ok("recovered".to_string()),
    ]);
    let call = time.runtime().unary(
        "library.Library/GetBook",
        transport.clone(),
        CallPolicy::non_idempotent(),
    );

    let overrides = CallPolicy::new().with_retry(RetryPolicy::idempotent());
    let book = call.call((), Some(&overrides)).await.unwrap();

    assert_eq!(book, "recovered");
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_backoff_stops_attempts() {
    let transport = Scripted::<String>::new(vec![
        Err(Status::unavailable("down")),
        Ok("never reached".to_string()),
    ]);
    let retry = RetryPolicy::new(
        BackoffPolicy::constant(Duration::from_secs(10)).unwrap(),
        BackoffPolicy::constant(Duration::from_secs(1)).unwrap(),
        Expiration::None,
    );
    let call = ClientRuntime::new().unary(
        "library.Library/GetBook",
        transport.clone(),
        CallPolicy::new().with_retry(retry),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let overrides = CallPolicy::new().with_cancellation(cancel);
    let err = call.call((), Some(&overrides)).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(Instant::now() - start, Duration::from_secs(2));

    // Nothing else runs once the call has returned.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn long_running_call_polls_until_done() {
    let time = FakeTime::new();
    let runtime = time.runtime();

    let polls = Scripted::<OperationSnapshot<String>>::new(vec![
        Ok(OperationSnapshot::running("operations/export-1")),
        Ok(OperationSnapshot::running("operations/export-1")),
        Ok(OperationSnapshot::succeeded(
            "operations/export-1",
            "42 books exported".to_string(),
        )),
    ]);
    let start = Scripted::new(vec![Ok(OperationSnapshot::running("operations/export-1"))]);
    let operations = runtime
        .operations::<String, _>(polls.clone())
        .with_base_policy(CallPolicy::non_idempotent());
    let export = runtime.long_running(
        "library.Library/ExportBooks",
        start,
        CallPolicy::non_idempotent(),
        operations,
    );

    let operation = export.call((), None).await.unwrap();
    assert_eq!(operation.name(), "operations/export-1");
    assert!(!operation.is_done());

    let operation = operation.poll_until_complete(None, None).await.unwrap();
    assert_eq!(polls.attempts(), 3);
    assert_eq!(
        operation.into_result().unwrap().unwrap(),
        "42 books exported"
    );
    assert_eq!(
        time.sleeps(),
        vec![Duration::from_secs(20), Duration::from_secs(30)]
    );
}

#[tokio::test]
async fn operation_resumed_by_name() {
    let time = FakeTime::new();
    let polls = Scripted::<OperationSnapshot<String>>::new(vec![Ok(OperationSnapshot::failed(
        "operations/export-1",
        Status::resource_exhausted("quota exceeded"),
    ))]);
    let operations = time.runtime().operations::<String, _>(polls);

    let operation = operations
        .poll_once_from_name("operations/export-1", None)
        .await
        .unwrap();
    assert!(operation.is_faulted());
    assert_eq!(
        operation.error().map(|s| s.code()),
        Some(Code::ResourceExhausted)
    );
}

#[derive(Debug, Clone, PartialEq)]
enum Wire {
    Message(&'static str),
    HalfClose,
}

/// Send side whose writes each wait for a permit from `gate`.
struct GatedSink {
    wire: mpsc::UnboundedSender<Wire>,
    gate: Arc<Semaphore>,
}

impl DuplexSink<&'static str> for GatedSink {
    fn send(&mut self, message: &'static str) -> BoxFuture<'_, Result<(), Status>> {
        async move {
            self.gate
                .acquire()
                .await
                .map_err(|_| Status::cancelled("gate closed"))?
                .forget();
            self.wire
                .send(Wire::Message(message))
                .map_err(|_| Status::unavailable("peer gone"))
        }
        .boxed()
    }

    fn close_send(&mut self) -> BoxFuture<'_, Result<(), Status>> {
        let sent = self
            .wire
            .send(Wire::HalfClose)
            .map_err(|_| Status::unavailable("peer gone"));
        async move { sent }.boxed()
    }
}

/// Opens one stream whose sent messages are observable on `wire`.
struct LoopbackDuplex {
    sink: Mutex<Option<GatedSink>>,
}

impl DuplexTransport<&'static str, &'static str> for LoopbackDuplex {
    fn open<'a>(
        &'a self,
        _timeout: Option<Duration>,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<DuplexChannel<&'static str, &'static str>, Status>> {
        let sink = self.sink.lock().unwrap().take();
        async move {
            let sink = sink.ok_or_else(|| Status::unavailable("already opened"))?;
            let (_tx, rx) = mpsc::unbounded_channel();
            let responses = UnboundedReceiverStream::new(rx).boxed();
            let channel: DuplexChannel<&'static str, &'static str> = (Box::new(sink), responses);
            Ok(channel)
        }
        .boxed()
    }
}

fn loopback() -> (
    LoopbackDuplex,
    Arc<Semaphore>,
    mpsc::UnboundedReceiver<Wire>,
) {
    let (wire, observed) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let transport = LoopbackDuplex {
        sink: Mutex::new(Some(GatedSink {
            wire,
            gate: Arc::clone(&gate),
        })),
    };
    (transport, gate, observed)
}

#[tokio::test]
async fn duplex_writer_respects_capacity_and_order() {
    let (transport, gate, mut observed) = loopback();
    let runtime = ClientRuntime::builder()
        .streaming_settings(StreamingSettings::new(2).unwrap())
        .build();
    let call = runtime
        .streaming("chat.Chat/Converse", transport, CallPolicy::new())
        .open(None, None)
        .await
        .unwrap();

    assert!(call.try_write("A").unwrap());
    assert!(call.try_write("B").unwrap());
    tokio::task::yield_now().await;
    assert!(!call.try_write("C").unwrap());

    gate.add_permits(1);
    assert_eq!(observed.recv().await, Some(Wire::Message("A")));
    // The drainer clears A's slot right after the send returns.
    tokio::task::yield_now().await;
    assert!(call.try_write("C").unwrap());

    gate.add_permits(2);
    call.write_complete().unwrap();
    call.closed().await.unwrap();

    assert_eq!(observed.recv().await, Some(Wire::Message("B")));
    assert_eq!(observed.recv().await, Some(Wire::Message("C")));
    assert_eq!(observed.recv().await, Some(Wire::HalfClose));
}

#[tokio::test]
async fn completed_writer_rejects_writes_but_drains() {
    let (transport, gate, mut observed) = loopback();
    let call = ClientRuntime::new()
        .streaming("chat.Chat/Converse", transport, CallPolicy::new())
        .open(None, None)
        .await
        .unwrap();

    call.try_write("first").unwrap();
    call.write("second", &CancellationToken::new()).await.unwrap();
    call.write_complete().unwrap();

    assert!(matches!(call.try_write("late"), Err(CallError::QueueClosed)));
    assert!(matches!(
        call.write("late", &CancellationToken::new()).await,
        Err(CallError::QueueClosed)
    ));
    assert!(observed.try_recv().is_err());

    gate.add_permits(2);
    call.closed().await.unwrap();

    let mut wire = Vec::new();
    while let Ok(event) = observed.try_recv() {
        wire.push(event);
    }
    assert_eq!(
        wire,
        vec![
            Wire::Message("first"),
            Wire::Message("second"),
            Wire::HalfClose
        ]
    );
}

#[tokio::test]
async fn stream_opens_only_once() {
    let (transport, _gate, _observed) = loopback();
    let converse = ClientRuntime::new().streaming("chat.Chat/Converse", transport, CallPolicy::new());

    let first = converse.open(None, None).await.unwrap();
    let err = converse.open(None, None).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(err.attempts(), Some(1));

    let (writer, mut responses) = first.into_parts();
    assert!(writer.try_write_complete());
    drop(writer);
    assert!(responses.next().await.is_none());
}
