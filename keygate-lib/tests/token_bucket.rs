use keygate_lib::{BucketConfig, ConsumeResult, ManualClock, TokenBucket};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn bucket(capacity: u64, per_second: u64) -> (TokenBucket, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let bucket = TokenBucket::new(BucketConfig::per_second(capacity, per_second), clock.clone());
    (bucket, clock)
}

#[test]
fn test_new_bucket_starts_full() {
    let (bucket, _) = bucket(5, 1);
    assert_eq!(bucket.available(), 5);
    assert!(bucket.is_full());
}

#[test]
fn test_tokens_never_exceed_capacity() {
    let (bucket, clock) = bucket(3, 100);

    clock.advance(Duration::from_secs(3600));
    assert_eq!(bucket.available(), 3);

    assert_eq!(bucket.try_consume(1).remaining(), 2);
    clock.advance(Duration::from_secs(3600));
    assert_eq!(bucket.try_consume(1).remaining(), 2);
}

#[test]
fn test_burst_then_reject() {
    let (bucket, _) = bucket(4, 1);

    for expected in (0..4).rev() {
        let result = bucket.try_consume(1);
        assert!(result.is_consumed());
        assert_eq!(result.remaining(), expected);
    }

    let result = bucket.try_consume(1);
    assert!(!result.is_consumed());
    assert_eq!(result.remaining(), 0);
    assert_eq!(result.wait(), Duration::from_secs(1));
}

#[test]
fn test_refill_is_monotonic_without_consumption() {
    let (bucket, clock) = bucket(10, 2);
    bucket.try_consume(10);

    let mut last = bucket.available();
    for _ in 0..20 {
        clock.advance(Duration::from_millis(250));
        let now = bucket.available();
        assert!(now >= last, "available went from {last} to {now}");
        last = now;
    }
    assert_eq!(last, 10);
}

#[test]
fn test_refill_is_continuous_not_windowed() {
    let (bucket, clock) = bucket(10, 10);
    bucket.try_consume(10);

    clock.advance(Duration::from_millis(300));
    assert_eq!(bucket.available(), 3);
    clock.advance(Duration::from_millis(50));
    assert_eq!(bucket.available(), 3);
    clock.advance(Duration::from_millis(50));
    assert_eq!(bucket.available(), 4);
}

#[test]
fn test_refill_over_interval() {
    // 10 tokens per minute
    let clock = Arc::new(ManualClock::new());
    let bucket =
        TokenBucket::new(BucketConfig::new(10, 10, Duration::from_secs(60)), clock.clone());
    bucket.try_consume(10);

    match bucket.try_consume(1) {
        ConsumeResult::Rejected { wait, .. } => assert_eq!(wait, Duration::from_secs(6)),
        other => panic!("expected rejection, got {other:?}"),
    }

    clock.advance(Duration::from_secs(6));
    assert!(bucket.try_consume(1).is_consumed());
}

#[test]
fn test_wait_covers_deficit_for_larger_cost() {
    let (bucket, clock) = bucket(5, 2);
    bucket.try_consume(5);
    clock.advance(Duration::from_millis(500));

    let result = bucket.try_consume(3);
    assert!(!result.is_consumed());
    assert_eq!(result.remaining(), 1);
    assert_eq!(result.wait(), Duration::from_secs(1));

    clock.advance(result.wait());
    assert!(bucket.try_consume(3).is_consumed());
}

#[test]
fn test_retry_after_is_floored() {
    let (bucket, clock) = bucket(1, 1);
    bucket.try_consume(1);
    clock.advance(Duration::from_millis(100));

    let result = bucket.try_consume(1);
    assert_eq!(result.wait(), Duration::from_millis(900));
    assert_eq!(result.retry_after_secs(), 0);
}

#[test]
fn test_no_over_admission_under_contention() {
    const CAPACITY: u64 = 25;
    const THREADS: usize = 64;

    // Zero refill so the only tokens are the initial ones.
    let clock = Arc::new(ManualClock::new());
    let bucket = Arc::new(TokenBucket::new(
        BucketConfig::new(CAPACITY, 0, Duration::from_secs(1)),
        clock,
    ));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bucket = bucket.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                bucket.try_consume(1).is_consumed()
            })
        })
        .collect();

    let admitted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|consumed| *consumed)
        .count();

    assert_eq!(admitted as u64, CAPACITY);
    assert_eq!(bucket.available(), 0);
}
