use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use pipeline::{
    Limit, OutputMode, ReceiveError, ReceiveOptions, ReceivePipeline, ReceiveSummary, TerminationPolicy,
};
use pubsub_api::{Admin, BackendError, BoxFuture, Delivered, Delivery, ReceiveSettings, Subscriber};
use topic_engine::{MemoryBackend, publish_with};

async fn setup() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.create_topic("events").await.unwrap();
    backend.create_subscription("events-sub", "events").await.unwrap();
    backend
}

fn options(limit: Limit, wait: Option<Duration>, output: OutputMode) -> ReceiveOptions {
    ReceiveOptions {
        policy: TerminationPolicy { limit, idle_timeout: wait },
        output,
        ..ReceiveOptions::default()
    }
}

async fn receive(
    backend: &MemoryBackend,
    options: ReceiveOptions,
) -> Result<(ReceiveSummary, String), ReceiveError> {
    receive_with(backend, options, CancellationToken::new()).await
}

async fn receive_with(
    backend: &MemoryBackend,
    options: ReceiveOptions,
    cancel: CancellationToken,
) -> Result<(ReceiveSummary, String), ReceiveError> {
    let delivery = backend
        .open_subscription("events-sub", options.settings)
        .await
        .unwrap();
    let (summary, out) = ReceivePipeline::new(options)
        .run(delivery, Vec::<u8>::new(), cancel)
        .await?;
    Ok((summary, String::from_utf8(out).unwrap()))
}

#[tokio::test]
async fn json_output_round_trips_payload_and_attributes() {
    let backend = setup().await;
    publish_with(&backend, "events", b"hello", &[("ts", "123")]).await.unwrap();

    let (summary, out) = receive(&backend, options(Limit::CountLimited(1), None, OutputMode::Json))
        .await
        .unwrap();

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1);
    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["data"], "hello");
    assert_eq!(value["attributes"]["ts"], "123");
    assert_eq!(value["attributes"].as_object().unwrap().len(), 1);
    assert_eq!(summary.counts.accepted, 1);
    assert_eq!(summary.counts.accepted_bytes, 5);
}

#[tokio::test(start_paused = true)]
async fn expect_fails_when_too_few_arrive() {
    let backend = setup().await;
    publish_with(&backend, "events", b"only", &[]).await.unwrap();

    let err = receive(
        &backend,
        options(Limit::ExpectLimited(2), Some(Duration::from_millis(100)), OutputMode::Pretty),
    )
    .await
    .unwrap_err();

    match err {
        ReceiveError::ExpectationMismatch { expected, processed, accepted } => {
            assert_eq!((expected, processed, accepted), (2, 1, 1));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn expect_succeeds_on_exact_count() {
    let backend = setup().await;
    for body in [b"a", b"b"] {
        publish_with(&backend, "events", body, &[]).await.unwrap();
    }

    let (summary, _) = receive(&backend, options(Limit::ExpectLimited(2), None, OutputMode::Pretty))
        .await
        .unwrap();

    assert_eq!(summary.counts.processed, 2);
    assert_eq!(summary.counts.accepted, 2);
}

#[tokio::test]
async fn zero_count_rejects_first_message() {
    let backend = setup().await;
    let id = publish_with(&backend, "events", b"nope", &[]).await.unwrap();

    let (summary, out) = receive(&backend, options(Limit::CountLimited(0), None, OutputMode::Pretty))
        .await
        .unwrap();

    assert_eq!(summary.counts.processed, 1);
    assert_eq!(summary.counts.accepted, 0);
    assert!(out.is_empty());
    assert_eq!(backend.ack_count("events-sub", &id).await, 0);
    assert_eq!(backend.nack_count("events-sub", &id).await, 1);
    assert_eq!(backend.pending("events-sub").await, 1);
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_ends_empty_receive() {
    let backend = setup().await;

    let (summary, out) = receive(
        &backend,
        options(Limit::Unbounded, Some(Duration::from_millis(100)), OutputMode::Pretty),
    )
    .await
    .unwrap();

    assert_eq!(summary.counts.accepted, 0);
    assert_eq!(summary.counts.processed, 0);
    assert!(out.is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_timer_rearms_after_each_message() {
    let backend = setup().await;
    let publisher = backend.clone();
    tokio::spawn(async move {
        for body in [b"1", b"2", b"3"] {
            tokio::time::sleep(Duration::from_millis(60)).await;
            publish_with(&publisher, "events", body, &[]).await.unwrap();
        }
    });

    let (summary, _) = receive(
        &backend,
        options(Limit::Unbounded, Some(Duration::from_millis(100)), OutputMode::None),
    )
    .await
    .unwrap();

    assert_eq!(summary.counts.accepted, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_print_whole_blocks() {
    let backend = setup().await;
    let mut ids = Vec::new();
    for i in 0..50 {
        let body = format!("message {i}");
        let seq = i.to_string();
        ids.push(publish_with(&backend, "events", body.as_bytes(), &[("seq", seq.as_str())]).await.unwrap());
    }

    let mut opts = options(Limit::CountLimited(50), None, OutputMode::Pretty);
    opts.verbose = true;
    opts.settings = ReceiveSettings::for_concurrency(8);
    let (summary, out) = receive(&backend, opts).await.unwrap();

    assert_eq!(summary.counts.processed, 50);
    assert_eq!(summary.counts.accepted, 50);

    // header, rule, attribute, rule, payload, end glyph
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 50 * 6, "{out}");
    let mut seen = HashSet::new();
    for block in lines.chunks(6) {
        let id = block[0].split(" @ ").next().unwrap();
        assert!(block[1].chars().all(|c| c == '─'), "{block:?}");
        let seq: usize = block[2].strip_prefix("seq: ").unwrap().parse().unwrap();
        assert!(block[3].chars().all(|c| c == '─'), "{block:?}");
        assert_eq!(block[4], format!("message {seq}"));
        assert_eq!(block[5], "◆");
        assert_eq!(id, ids[seq], "header and body belong to different messages");
        assert!(seen.insert(id.to_string()), "message {id} printed twice");
    }
    assert_eq!(seen, ids.iter().cloned().collect::<HashSet<_>>());

    for id in &ids {
        assert_eq!(backend.ack_count("events-sub", id).await, 1);
        assert_eq!(backend.nack_count("events-sub", id).await, 0);
    }
}

#[tokio::test]
async fn count_limit_with_many_workers_settles_each_message_once() {
    let backend = setup().await;
    let mut ids = Vec::new();
    for i in 0..20 {
        let body = format!("m{i}");
        ids.push(publish_with(&backend, "events", body.as_bytes(), &[]).await.unwrap());
    }

    let mut opts = options(Limit::CountLimited(5), None, OutputMode::None);
    opts.settings = ReceiveSettings::for_concurrency(8);
    let (summary, _) = receive(&backend, opts).await.unwrap();

    assert_eq!(summary.counts.accepted, 5);
    let mut acked = 0;
    for id in &ids {
        let acks = backend.ack_count("events-sub", id).await;
        let nacks = backend.nack_count("events-sub", id).await;
        assert!(acks <= 1 && nacks <= 1, "message {id}: {acks} acks, {nacks} nacks");
        assert!(acks + nacks <= 1, "message {id} settled twice");
        acked += acks;
    }
    assert_eq!(acked, 5);
    assert_eq!(backend.pending("events-sub").await, 15);
}

#[tokio::test]
async fn over_limit_messages_are_never_acked() {
    let backend = setup().await;
    let mut ids = Vec::new();
    for body in [b"1", b"2", b"3"] {
        ids.push(publish_with(&backend, "events", body, &[]).await.unwrap());
    }

    let (summary, _) = receive(&backend, options(Limit::CountLimited(2), None, OutputMode::Pretty))
        .await
        .unwrap();

    assert_eq!(summary.counts.accepted, 2);
    assert_eq!(backend.ack_count("events-sub", &ids[0]).await, 1);
    assert_eq!(backend.ack_count("events-sub", &ids[1]).await, 1);
    assert_eq!(backend.ack_count("events-sub", &ids[2]).await, 0);
    for id in &ids {
        let settled = backend.ack_count("events-sub", id).await + backend.nack_count("events-sub", id).await;
        assert!(settled <= 1, "message {id} settled {settled} times");
    }
}

#[tokio::test]
async fn output_follows_forwarding_order() {
    let backend = setup().await;
    let mut ids = Vec::new();
    for body in [b"a", b"b", b"c"] {
        ids.push(publish_with(&backend, "events", body, &[]).await.unwrap());
    }

    let (_, out) = receive(&backend, options(Limit::CountLimited(3), None, OutputMode::Pretty))
        .await
        .unwrap();

    let seen: Vec<&str> = out
        .lines()
        .map(|l| l.split(" @ ").next().unwrap())
        .collect();
    assert_eq!(seen, ids.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn quiet_one_prints_markers_and_newline() {
    let backend = setup().await;
    for body in [b"a", b"b", b"c"] {
        publish_with(&backend, "events", body, &[]).await.unwrap();
    }

    let mut opts = options(Limit::CountLimited(3), None, OutputMode::Json);
    opts.quiet = 1;
    let (_, out) = receive(&backend, opts).await.unwrap();

    assert_eq!(out, "...\n");
}

#[tokio::test]
async fn quiet_two_prints_nothing() {
    let backend = setup().await;
    publish_with(&backend, "events", b"a", &[]).await.unwrap();

    let mut opts = options(Limit::CountLimited(1), None, OutputMode::Pretty);
    opts.quiet = 2;
    let (summary, out) = receive(&backend, opts).await.unwrap();

    assert!(out.is_empty());
    assert_eq!(summary.counts.accepted, 1);
}

#[tokio::test]
async fn no_ack_neither_settles_nor_counts_accepted() {
    let backend = setup().await;
    let id = publish_with(&backend, "events", b"keep", &[]).await.unwrap();

    let mut opts = options(Limit::CountLimited(1), None, OutputMode::Pretty);
    opts.no_ack = true;
    let (summary, out) = receive(&backend, opts).await.unwrap();

    assert!(out.starts_with(&format!("{id} @ ")), "{out}");
    assert_eq!(summary.counts.processed, 1);
    assert_eq!(summary.counts.accepted, 0);
    assert_eq!(summary.counts.accepted_bytes, 0);
    assert_eq!(backend.ack_count("events-sub", &id).await, 0);
    assert_eq!(backend.nack_count("events-sub", &id).await, 0);
}

#[tokio::test]
async fn no_ack_markers_still_end_with_newline() {
    let backend = setup().await;
    for body in [b"a", b"b"] {
        publish_with(&backend, "events", body, &[]).await.unwrap();
    }

    let mut opts = options(Limit::CountLimited(2), None, OutputMode::None);
    opts.no_ack = true;
    let (_, out) = receive(&backend, opts).await.unwrap();

    assert_eq!(out, "..\n");
}

/// Counts `close` calls on the wrapped delivery.
struct CloseCounter {
    inner: Arc<dyn Delivery>,
    closed: AtomicUsize,
}

impl Delivery for CloseCounter {
    fn next(&self) -> BoxFuture<'_, Result<Option<Delivered>, BackendError>> {
        self.inner.next()
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        self.inner.stop()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }
}

#[derive(Debug)]
struct BrokenPipe;

impl AsyncWrite for BrokenPipe {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn output_failure_still_closes_delivery() {
    let backend = setup().await;
    let id = publish_with(&backend, "events", b"gone", &[]).await.unwrap();

    let opts = options(Limit::CountLimited(1), None, OutputMode::Pretty);
    let delivery = Arc::new(CloseCounter {
        inner: backend.open_subscription("events-sub", opts.settings).await.unwrap(),
        closed: AtomicUsize::new(0),
    });

    let err = ReceivePipeline::new(opts)
        .run(delivery.clone(), BrokenPipe, CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ReceiveError::Output(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(delivery.closed.load(Ordering::SeqCst), 1);
    assert_eq!(backend.ack_count("events-sub", &id).await, 1);
}

#[tokio::test]
async fn external_cancel_is_not_an_error() {
    let backend = setup().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (summary, out) = receive_with(
        &backend,
        options(Limit::Unbounded, None, OutputMode::Pretty),
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(summary.counts.processed, 0);
    assert!(out.is_empty());
}

#[tokio::test]
async fn deleted_subscription_fails_receive() {
    let backend = setup().await;
    let delivery = backend
        .open_subscription("events-sub", ReceiveSettings::default())
        .await
        .unwrap();
    backend.delete_subscription("events-sub").await.unwrap();

    let err = ReceivePipeline::new(options(Limit::Unbounded, None, OutputMode::Pretty))
        .run(delivery, Vec::<u8>::new(), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ReceiveError::Backend(e) => assert!(e.is_not_found()),
        other => panic!("unexpected error: {other}"),
    }
}
