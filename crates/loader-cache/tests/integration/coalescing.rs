use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use loader_cache::{Cache, CacheConfig, InFlightInvalidation, Source};
use loader_test::{Calls, Gate};

use crate::{Answer, TestError, local, remote};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_fetch() {
    loader_test::setup();

    let calls = Calls::new();
    let fetcher = loader_test::sleeping(Duration::from_millis(50), &calls, |key: &u32| {
        Ok::<_, TestError>(format!("v{key}"))
    });
    let cache = Cache::new(CacheConfig::named("items"), fetcher);

    let (first, second, third) = futures::join!(cache.get(7), cache.get(7), cache.get(7));
    assert_eq!(calls.keys(), [7]);
    assert_eq!(first, remote("v7"));
    assert_eq!(second, remote("v7"));
    assert_eq!(third, remote("v7"));

    // a request after the fetch resolved is answered right away
    let (sender, receiver) = mpsc::channel();
    cache.fetch(7, move |source, result| sender.send((source, result)).unwrap());
    assert_eq!(receiver.try_recv().unwrap(), local("v7"));
    assert_eq!(calls.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_is_retried_by_next_request() {
    loader_test::setup();

    let attempts = AtomicUsize::new(0);
    let calls = Calls::new();
    let fetcher = loader_test::sleeping(Duration::from_millis(10), &calls, move |key: &u32| {
        match attempts.fetch_add(1, Ordering::Relaxed) {
            0 => Err(TestError::Failed("connection reset".into())),
            _ => Ok(format!("v{key}")),
        }
    });
    let cache = Cache::new(CacheConfig::named("items"), fetcher);

    let (first, second) = futures::join!(cache.get(3), cache.get(3));
    let failed = (
        Source::Remote,
        Err(TestError::Failed("connection reset".into())),
    );
    assert_eq!(first, failed);
    assert_eq!(second, failed);
    assert!(cache.is_empty());

    assert_eq!(cache.get(3).await, remote("v3"));
    assert_eq!(cache.get(3).await, local("v3"));
    assert_eq!(calls.keys(), [3, 3]);
}

#[tokio::test]
async fn test_panicking_fetch_is_abandoned() {
    loader_test::setup();

    let calls = Calls::new();
    let fetcher = loader_test::sleeping(Duration::ZERO, &calls, |key: &u32| {
        if *key == 0 {
            panic!("no such item");
        }
        Ok::<_, TestError>(format!("v{key}"))
    });
    let cache = Cache::new(CacheConfig::named("items"), fetcher);

    assert_eq!(cache.get(0).await, (Source::Remote, Err(TestError::Abandoned)));
    assert_eq!(cache.in_flight(), 0);
    assert_eq!(cache.get(1).await, remote("v1"));
}

#[test]
fn test_fan_out_order_across_joined_requests() {
    loader_test::setup();

    let gate = Gate::<u32, String, TestError>::new();
    let cache = Cache::new(CacheConfig::named("items"), gate.clone());
    let (sender, receiver) = mpsc::channel();

    for id in 1..=3 {
        let sender = sender.clone();
        cache.fetch(7, move |source, result| sender.send((id, source, result)).unwrap());
    }
    assert_eq!(cache.in_flight(), 1);
    assert!(gate.release(&7, Ok("v7".into())));

    let order: Vec<_> = receiver.try_iter().map(|(id, _, _)| id).collect();
    assert_eq!(order, [1, 2, 3]);
    assert_eq!(gate.calls().keys(), [7]);
}

#[test]
fn test_invalidation_policies_during_fetch() {
    loader_test::setup();

    for (policy, stored) in [
        (InFlightInvalidation::Discard, false),
        (InFlightInvalidation::Commit, true),
    ] {
        let gate = Gate::<u32, String, TestError>::new();
        let config = CacheConfig::named("items").in_flight_invalidation(policy);
        let cache = Cache::new(config, gate.clone());
        let (sender, receiver) = mpsc::channel::<Answer>();

        let first = sender.clone();
        cache.fetch(7, move |source, result| first.send((source, result)).unwrap());
        cache.invalidate_many([7u32, 8]);
        assert!(gate.release(&7, Ok("v7".into())));
        assert_eq!(receiver.try_recv().unwrap(), remote("v7"));

        cache.fetch(7, move |source, result| sender.send((source, result)).unwrap());
        if stored {
            assert_eq!(receiver.try_recv().unwrap(), local("v7"), "{policy:?}");
            assert_eq!(gate.calls().len(), 1);
        } else {
            assert!(receiver.try_recv().is_err(), "{policy:?}");
            assert_eq!(gate.calls().len(), 2);
        }
    }
}

#[test]
fn test_abandoned_gate_fetch() {
    loader_test::setup();

    let gate = Gate::<u32, String, TestError>::new();
    let cache = Cache::new(CacheConfig::named("items"), gate.clone());
    let (sender, receiver) = mpsc::channel::<Answer>();

    cache.fetch(7, move |source, result| sender.send((source, result)).unwrap());
    assert!(gate.abandon(&7));

    // the callback, and with it the only sender, was dropped
    assert_eq!(receiver.try_recv(), Err(mpsc::TryRecvError::Disconnected));
    assert_eq!(cache.in_flight(), 0);
}
