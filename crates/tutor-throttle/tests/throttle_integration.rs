use std::sync::Arc;
use std::time::Duration;

use tutor_throttle::Throttle;

/// Admits up to `max_concurrent` immediately; the next caller queues
/// until a permit is released, then is admitted in turn (spec §4.11).
#[tokio::test]
async fn admits_up_to_capacity_then_queues() {
    let throttle = Throttle::new(1, 4, Duration::from_secs(5));

    let first = throttle.acquire().await.unwrap();
    assert_eq!(throttle.stats().active, 1);

    let throttle2 = throttle.clone();
    let waiter = tokio::spawn(async move { throttle2.acquire().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(throttle.stats().queue_len, 1);

    first.release();
    let second = waiter.await.unwrap().unwrap();
    assert_eq!(throttle.stats().active, 1);
    second.release();
    assert_eq!(throttle.stats().active, 0);
}

/// A full queue rejects synchronously with `QueueFull`, never blocking
/// the caller (spec §4.11 "Admission").
#[tokio::test]
async fn full_queue_rejects_synchronously() {
    let throttle = Throttle::new(1, 1, Duration::from_secs(30));

    let _held = throttle.acquire().await.unwrap();
    let _queued = {
        let throttle = throttle.clone();
        tokio::spawn(async move { throttle.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let rejected = throttle.acquire().await;
    assert!(matches!(rejected, Err(tutor_core::ThrottleError::QueueFull)));
}

/// Every admitted permit is eventually released, whether explicitly or
/// via drop; active count never goes negative or leaks across a batch of
/// concurrent callers (spec §4.11 conservation).
#[tokio::test]
async fn concurrent_callers_conserve_active_count() {
    let throttle = Arc::new(Throttle::new(4, 32, Duration::from_secs(5)));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let throttle = throttle.clone();
        handles.push(tokio::spawn(async move {
            let permit = throttle.acquire().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(permit);
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let stats = throttle.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.total_completed, 16);
}

/// `from_config` wires the same knobs `ThrottleConfig` carries.
#[tokio::test]
async fn from_config_honors_configured_limits() {
    let config = tutor_core::ThrottleConfig {
        max_concurrent: 2,
        max_queue_size: 0,
        queue_timeout_ms: 100,
    };
    let throttle = Throttle::from_config(&config);

    let _a = throttle.acquire().await.unwrap();
    let _b = throttle.acquire().await.unwrap();

    let rejected = throttle.acquire().await;
    assert!(matches!(rejected, Err(tutor_core::ThrottleError::QueueFull)));
}
