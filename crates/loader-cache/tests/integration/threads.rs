use std::collections::BTreeMap;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use loader_cache::{Cache, CacheConfig, Coalescer};
use loader_test::Gate;

use crate::{TestError, remote};

const THREADS: usize = 16;

#[test]
fn test_threads_share_one_fetch() {
    loader_test::setup();

    let gate = Gate::<u32, String, TestError>::new();
    let cache = Cache::new(CacheConfig::named("threads"), gate.clone());
    let answers = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = cache.clone();
            let answers = Arc::clone(&answers);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.fetch(7, move |source, result| {
                    answers.lock().unwrap().push((source, result));
                });
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(gate.calls().keys(), [7]);
    assert!(answers.lock().unwrap().is_empty());

    assert!(gate.release(&7, Ok("v7".into())));
    let answers = answers.lock().unwrap();
    assert_eq!(answers.len(), THREADS);
    assert!(answers.iter().all(|answer| *answer == remote("v7")));
}

#[test]
fn test_threads_fetch_each_key_once() {
    loader_test::setup();

    let gate = Gate::<u32, u32, TestError>::new();
    let coalescer = Coalescer::new("threads", gate.clone());
    let received = Arc::new(Mutex::new(BTreeMap::<u32, usize>::new()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|offset| {
            let coalescer = coalescer.clone();
            let received = Arc::clone(&received);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..50 {
                    let key = ((i + offset * 7) % 50) as u32;
                    let received = Arc::clone(&received);
                    coalescer.fetch(key, move |result| {
                        let value = result.unwrap();
                        *received.lock().unwrap().entry(value).or_default() += 1;
                    });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut keys = gate.calls().keys();
    keys.sort();
    assert_eq!(keys, (0..50).collect::<Vec<u32>>());
    assert_eq!(coalescer.in_flight(), 50);

    for key in 0..50 {
        assert!(gate.release(&key, Ok(key)));
    }

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 50);
    assert!(received.values().all(|count| *count == THREADS));
}

#[test]
fn test_threads_release_while_requesting() {
    loader_test::setup();

    let gate = Gate::<u32, String, TestError>::new();
    let cache = Cache::new(CacheConfig::named("threads"), gate.clone());
    let answers = Arc::new(Mutex::new(Vec::new()));

    cache.fetch(1, |_, _| {});
    let requester = {
        let cache = cache.clone();
        let answers = Arc::clone(&answers);
        thread::spawn(move || {
            for _ in 0..1000 {
                let answers = Arc::clone(&answers);
                cache.fetch(1, move |source, result| {
                    answers.lock().unwrap().push((source, result));
                });
            }
        })
    };
    let releaser = {
        let gate = gate.clone();
        thread::spawn(move || while !gate.release(&1, Ok("v1".into())) {})
    };
    requester.join().unwrap();
    releaser.join().unwrap();

    // every request was answered, either by joining the single fetch or from storage
    let answers = answers.lock().unwrap();
    assert_eq!(answers.len(), 1000);
    assert!(
        answers
            .iter()
            .all(|(_, result)| result.as_deref() == Ok("v1"))
    );
    assert_eq!(gate.calls().len(), 1);
    assert_eq!(cache.len(), 1);
}
