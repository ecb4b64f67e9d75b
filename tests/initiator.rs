//! Initiator state machine tests
//!
//! Drives the initiator directly through its outbound queue with a manual
//! scheduler and clock, so deadlines and round trips are fully controlled.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use perf_protocol::config::ProtocolConfig;
use perf_protocol::core::correlation::CorrelationId;
use perf_protocol::core::payload;
use perf_protocol::protocol::Initiator;
use perf_protocol::utils::scheduler::{Deadline, DeadlineAction, Scheduler, TokioScheduler};
use perf_protocol::utils::time::{Clock, ManualClock, SystemClock};
use perf_protocol::ProtocolError;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

/// Scheduler whose deadlines fire only when the test says so
#[derive(Default)]
struct ManualScheduler {
    queued: Mutex<Vec<(Arc<AtomicBool>, DeadlineAction)>>,
    shut_down: AtomicBool,
    shutdowns: AtomicUsize,
}

impl ManualScheduler {
    /// Run every deadline that is still armed; returns how many ran
    fn fire_all(&self) -> usize {
        if self.shut_down.load(Ordering::SeqCst) {
            return 0;
        }
        let queued: Vec<_> = self.queued.lock().unwrap().drain(..).collect();
        let mut fired = 0;
        for (cancelled, action) in queued {
            if !cancelled.load(Ordering::SeqCst) {
                action();
                fired += 1;
            }
        }
        fired
    }

    fn armed(&self) -> usize {
        self.queued
            .lock()
            .unwrap()
            .iter()
            .filter(|(cancelled, _)| !cancelled.load(Ordering::SeqCst))
            .count()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, _delay: Duration, action: DeadlineAction) -> Deadline {
        if self.shut_down.load(Ordering::SeqCst) {
            return Deadline::inert();
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        self.queued.lock().unwrap().push((cancelled.clone(), action));
        Deadline::new(move || cancelled.store(true, Ordering::SeqCst))
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.shut_down.store(true, Ordering::SeqCst);
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

struct Harness {
    initiator: Initiator,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    scheduler: Arc<ManualScheduler>,
    clock: Arc<ManualClock>,
}

fn harness(config: ProtocolConfig) -> Harness {
    let (tx, outbound) = mpsc::unbounded_channel();
    let scheduler = Arc::new(ManualScheduler::default());
    let clock = Arc::new(ManualClock::new());
    let initiator = Initiator::new(
        config,
        tx,
        scheduler.clone(),
        clock.clone(),
        Default::default(),
    );
    Harness {
        initiator,
        outbound,
        scheduler,
        clock,
    }
}

#[tokio::test]
async fn test_out_of_order_replies_match_their_requests() {
    const N: usize = 16;
    let mut h = harness(ProtocolConfig::new(32, 8));

    let measurements: Vec<_> = (0..N).map(|_| h.initiator.measure()).collect();
    let mut requests = Vec::with_capacity(N);
    for _ in 0..N {
        requests.push(h.outbound.recv().await.unwrap());
    }
    assert_eq!(h.initiator.pending_count(), N);

    requests.shuffle(&mut rand::rng());

    let mut expected = HashMap::new();
    for (i, request) in requests.iter().enumerate() {
        h.clock.advance(Duration::from_millis(1));
        let id = CorrelationId::from_payload(request).unwrap();
        let reply = payload::reply(request, 8).unwrap();
        let rtt = h.initiator.on_frame(&reply).unwrap();
        assert_eq!(rtt, Duration::from_millis(i as u64 + 1));
        expected.insert(id, rtt);
    }

    let ids: Vec<_> = measurements
        .iter()
        .map(|m| m.correlation_id().unwrap())
        .collect();
    let results = join_all(measurements).await;
    for (id, result) in ids.iter().zip(results) {
        assert_eq!(result.unwrap(), expected[id]);
    }
    assert_eq!(h.initiator.pending_count(), 0);

    // Every deadline was cancelled by its reply
    assert_eq!(h.scheduler.armed(), 0);
    assert_eq!(h.scheduler.fire_all(), 0);

    // Replaying any reply is now a violation
    let replay = payload::reply(&requests[0], 8).unwrap();
    assert!(matches!(
        h.initiator.on_frame(&replay),
        Err(ProtocolError::ProtocolViolation(_))
    ));

    let snapshot = h.initiator.metrics().snapshot();
    assert_eq!(snapshot.requests_sent, N as u64);
    assert_eq!(snapshot.replies_received, N as u64);
    assert_eq!(snapshot.protocol_violations, 1);
    assert_eq!(snapshot.bytes_sent, (N * 36) as u64);
}

#[tokio::test]
async fn test_unknown_reply_leaves_other_requests_alone() {
    let mut h = harness(ProtocolConfig::new(4, 4));
    let m = h.initiator.measure();
    let request = h.outbound.recv().await.unwrap();
    let id = m.correlation_id().unwrap();

    let stranger = CorrelationId::new(id.value().wrapping_add(1));
    let mut bogus = vec![0u8; 8];
    stranger.write_prefix(&mut bogus).unwrap();

    match h.initiator.on_frame(&bogus) {
        Err(ProtocolError::ProtocolViolation(got)) => assert_eq!(got, stranger),
        other => panic!("expected protocol violation, got {other:?}"),
    }
    assert_eq!(h.initiator.pending_count(), 1);

    h.clock.advance(Duration::from_micros(250));
    h.initiator
        .on_frame(&payload::reply(&request, 4).unwrap())
        .unwrap();
    assert_eq!(m.await.unwrap(), Duration::from_micros(250));
}

#[tokio::test]
async fn test_deadline_fails_only_unanswered_requests() {
    let mut h = harness(ProtocolConfig::new(4, 4).with_timeout(Duration::from_secs(5)));

    let answered = h.initiator.measure();
    let late_a = h.initiator.measure();
    let late_b = h.initiator.measure();
    let first = h.outbound.recv().await.unwrap();
    let second = h.outbound.recv().await.unwrap();

    h.initiator
        .on_frame(&payload::reply(&first, 4).unwrap())
        .unwrap();
    assert_eq!(h.scheduler.fire_all(), 2);

    assert!(answered.await.is_ok());
    assert!(matches!(late_a.await, Err(ProtocolError::Timeout)));
    assert!(matches!(late_b.await, Err(ProtocolError::Timeout)));
    assert_eq!(h.initiator.pending_count(), 0);
    assert_eq!(h.initiator.metrics().snapshot().timeouts, 2);

    // A reply arriving after its deadline has nothing to match
    assert!(matches!(
        h.initiator.on_frame(&payload::reply(&second, 4).unwrap()),
        Err(ProtocolError::ProtocolViolation(_))
    ));
}

#[tokio::test]
async fn test_close_drains_every_pending_request() {
    const K: usize = 5;
    let h = harness(ProtocolConfig::new(4, 4));

    let measurements: Vec<_> = (0..K).map(|_| h.initiator.measure()).collect();
    assert_eq!(h.scheduler.armed(), K);

    assert_eq!(h.initiator.on_close(), K);
    assert_eq!(h.initiator.on_close(), 0);
    assert_eq!(h.scheduler.shutdowns.load(Ordering::SeqCst), 1);
    assert!(h.initiator.is_closed());
    assert_eq!(h.initiator.pending_count(), 0);

    for result in join_all(measurements).await {
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    // Nothing fires once the scheduler is down
    assert_eq!(h.scheduler.fire_all(), 0);
    assert_eq!(h.initiator.metrics().snapshot().timeouts, 0);
    assert_eq!(h.initiator.metrics().snapshot().closed_failures, K as u64);

    let after = h.initiator.measure();
    assert!(after.correlation_id().is_none());
    assert!(matches!(after.await, Err(ProtocolError::ConnectionClosed)));
}

#[tokio::test]
async fn test_measure_with_writer_gone_fails_on_close() {
    let h = harness(ProtocolConfig::new(4, 4));
    let Harness {
        initiator,
        outbound,
        ..
    } = h;
    drop(outbound);

    let m = initiator.measure();
    assert_eq!(initiator.pending_count(), 1);
    assert_eq!(initiator.metrics().snapshot().requests_sent, 0);

    initiator.on_close();
    assert!(matches!(m.await, Err(ProtocolError::ConnectionClosed)));
}

fn tokio_initiator(timeout: Duration) -> (Initiator, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let initiator = Initiator::new(
        ProtocolConfig::new(16, 16).with_timeout(timeout),
        tx,
        Arc::new(TokioScheduler::new()),
        Arc::new(SystemClock),
        Default::default(),
    );
    (initiator, rx)
}

#[tokio::test(start_paused = true)]
async fn test_timeout_on_tokio_time() {
    let (initiator, mut rx) = tokio_initiator(Duration::from_secs(5));
    let start = tokio::time::Instant::now();

    let m = initiator.measure();
    let request = rx.recv().await.unwrap();

    assert!(matches!(m.await, Err(ProtocolError::Timeout)));
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(initiator.pending_count(), 0);

    let late = payload::reply(&request, 16).unwrap();
    assert!(matches!(
        initiator.on_frame(&late),
        Err(ProtocolError::ProtocolViolation(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reply_before_deadline_on_tokio_time() {
    let (initiator, mut rx) = tokio_initiator(Duration::from_secs(5));
    let clock = SystemClock;
    let start = clock.now();

    let m = initiator.measure();
    let request = rx.recv().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    initiator
        .on_frame(&payload::reply(&request, 16).unwrap())
        .unwrap();

    let rtt = m.await.unwrap();
    assert!(rtt >= Duration::from_secs(2));
    assert!(rtt <= clock.now() - start);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(initiator.metrics().snapshot().timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_deadline_fires_after_close() {
    let (initiator, _rx) = tokio_initiator(Duration::from_secs(1));
    let measurements: Vec<_> = (0..3).map(|_| initiator.measure()).collect();

    assert_eq!(initiator.on_close(), 3);
    tokio::time::sleep(Duration::from_secs(5)).await;

    for result in join_all(measurements).await {
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
    assert_eq!(initiator.metrics().snapshot().timeouts, 0);
}
