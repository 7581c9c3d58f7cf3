use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use token_throttle::{BucketStore, ManualClock};

/// Runs `f` on `threads` threads released together, returning every result.
fn run_together<T, F>(threads: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(threads));
    let f = Arc::new(f);

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let barrier = barrier.clone();
            let f = f.clone();
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_exactly_capacity_admissions_without_refill() {
    const N: usize = 64;
    let store = Arc::new(BucketStore::with_clock(ManualClock::new()));

    let shared = store.clone();
    let outcomes = run_together(N, move |_| {
        shared.try_consume("fresh", 1, N as u32, 0.0).unwrap()
    });

    assert_eq!(outcomes.iter().filter(|allowed| **allowed).count(), N);
    assert_eq!(store.available_tokens("fresh"), Some(0.0));
    assert!(!store.try_consume("fresh", 1, N as u32, 0.0).unwrap());
}

#[test]
fn test_no_double_spend_when_oversubscribed() {
    let store = Arc::new(BucketStore::with_clock(ManualClock::new()));

    let shared = store.clone();
    let outcomes = run_together(200, move |_| {
        shared.try_consume("contended", 1, 50, 0.0).unwrap()
    });

    assert_eq!(outcomes.iter().filter(|allowed| **allowed).count(), 50);
    assert_eq!(store.available_tokens("contended"), Some(0.0));
}

#[test]
fn test_mixed_costs_never_overdraw() {
    let store = Arc::new(BucketStore::with_clock(ManualClock::new()));

    let shared = store.clone();
    let outcomes = run_together(48, move |i| {
        let cost = (i % 3 + 1) as u32;
        (cost, shared.try_consume("mixed", cost, 40, 0.0).unwrap())
    });

    let consumed: u32 = outcomes
        .iter()
        .filter(|(_, allowed)| *allowed)
        .map(|(cost, _)| cost)
        .sum();
    assert!(consumed <= 40);

    let remaining = store.available_tokens("mixed").unwrap();
    assert_eq!(remaining, f64::from(40 - consumed));
}

#[test]
fn test_concurrent_first_access_creates_one_bucket() {
    let store = Arc::new(BucketStore::with_clock(ManualClock::new()));

    let shared = store.clone();
    run_together(32, move |_| shared.try_consume("same-key", 1, 1000, 1.0).unwrap());

    assert_eq!(store.count(), 1);
    assert_eq!(store.available_tokens("same-key"), Some(968.0));
}

#[test]
fn test_distinct_keys_are_independent() {
    let store = Arc::new(BucketStore::with_clock(ManualClock::new()));

    let shared = store.clone();
    let outcomes = run_together(16, move |i| {
        let key = format!("client-{}", i);
        (0..10).all(|_| shared.try_consume(&key, 1, 10, 0.0).unwrap())
    });

    assert!(outcomes.into_iter().all(|all_admitted| all_admitted));
    assert_eq!(store.count(), 16);
}

#[test]
fn test_concurrent_refill_credits_interval_once() {
    let clock = ManualClock::new();
    let store = Arc::new(BucketStore::with_clock(clock.clone()));
    assert!(store.try_consume("refill", 100, 100, 10.0).unwrap());

    clock.advance(Duration::from_secs(1));

    let shared = store.clone();
    run_together(32, move |_| shared.available_tokens("refill"));

    assert_eq!(store.available_tokens("refill"), Some(10.0));
}

#[test]
fn test_refill_then_consume_admits_every_caller_once() {
    const N: usize = 64;
    let clock = ManualClock::new();
    let store = Arc::new(BucketStore::with_clock(clock.clone()));
    assert!(store.try_consume("drained", N as u32, N as u32, N as f64).unwrap());

    // One second accrues exactly N tokens. A caller that sees the interval
    // claimed but not yet credited would be denied here.
    clock.advance(Duration::from_secs(1));

    for _ in 0..20 {
        let shared = store.clone();
        let outcomes = run_together(N, move |_| {
            shared.try_consume("drained", 1, N as u32, N as f64).unwrap()
        });

        assert_eq!(outcomes.iter().filter(|allowed| **allowed).count(), N);
        assert_eq!(store.available_tokens("drained"), Some(0.0));
        clock.advance(Duration::from_secs(1));
    }
}

#[test]
fn test_reset_during_contention_leaves_consistent_state() {
    let store = Arc::new(BucketStore::with_clock(ManualClock::new()));

    let shared = store.clone();
    run_together(32, move |i| {
        if i % 8 == 0 {
            shared.reset("churn");
        }
        shared.try_consume("churn", 1, 5, 0.0).unwrap()
    });

    assert!(store.count() <= 1);
    if let Some(remaining) = store.available_tokens("churn") {
        assert!((0.0..=5.0).contains(&remaining));
    }
}
