//! Bounded-concurrency admission control with a fair FIFO wait queue
//! (spec §4.11). One `Throttle` instance guards one logical endpoint; it
//! is constructed explicitly and passed in rather than hung off a global
//! singleton (spec §9 "No shared mutable singletons by default").

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tutor_core::ThrottleError;

struct Waiter {
    id: u64,
    claimed: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<()>>>,
    enqueued_at: Instant,
}

struct State {
    active: usize,
    queue: VecDeque<Arc<Waiter>>,
    total_requests: u64,
    total_admitted: u64,
    total_rejected: u64,
    total_timed_out: u64,
    total_completed: u64,
    peak_active: usize,
    peak_queue_size: usize,
    wait_sum_ms: u64,
    wait_count: u64,
}

struct Inner {
    max_concurrent: usize,
    max_queue_size: usize,
    queue_timeout: Duration,
    state: Mutex<State>,
    next_id: AtomicU64,
}

/// Bounded-concurrency admission controller (spec §4.11).
#[derive(Clone)]
pub struct Throttle(Arc<Inner>);

/// Point-in-time counters/gauges for the metrics collector (spec §4.11
/// "Observability").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleStats {
    pub active: usize,
    pub queue_len: usize,
    pub total_requests: u64,
    pub total_admitted: u64,
    pub total_rejected: u64,
    pub total_timed_out: u64,
    pub total_completed: u64,
    pub peak_active: usize,
    pub peak_queue_size: usize,
    pub avg_queue_wait_ms: f64,
}

/// An admitted slot. Releases automatically when dropped — this is the
/// only way a slot is returned (spec §4.11 `release()`), so cancellation
/// (drop without an explicit call) can never leak a slot.
pub struct Permit {
    inner: Arc<Inner>,
    released: AtomicBool,
}

impl Permit {
    /// Releases the slot explicitly. Idempotent; also runs on `Drop`.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        Throttle::do_release(&self.inner);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.release();
    }
}

impl Throttle {
    pub fn new(max_concurrent: usize, max_queue_size: usize, queue_timeout: Duration) -> Self {
        Self(Arc::new(Inner {
            max_concurrent,
            max_queue_size,
            queue_timeout,
            next_id: AtomicU64::new(0),
            state: Mutex::new(State {
                active: 0,
                queue: VecDeque::new(),
                total_requests: 0,
                total_admitted: 0,
                total_rejected: 0,
                total_timed_out: 0,
                total_completed: 0,
                peak_active: 0,
                peak_queue_size: 0,
                wait_sum_ms: 0,
                wait_count: 0,
            }),
        }))
    }

    pub fn from_config(config: &tutor_core::ThrottleConfig) -> Self {
        Self::new(
            config.max_concurrent,
            config.max_queue_size,
            Duration::from_millis(config.queue_timeout_ms),
        )
    }

    /// Admits immediately if under `maxConcurrent`; otherwise enqueues up
    /// to `maxQueueSize` with a per-waiter deadline, or fails synchronously
    /// with `QueueFull` (spec §4.11).
    pub async fn acquire(&self) -> Result<Permit, ThrottleError> {
        let inner = self.0.clone();

        {
            let mut state = inner.state.lock();
            state.total_requests += 1;

            if state.active < inner.max_concurrent {
                state.active += 1;
                state.total_admitted += 1;
                state.peak_active = state.peak_active.max(state.active);
                return Ok(Permit {
                    inner,
                    released: AtomicBool::new(false),
                });
            }

            if state.queue.len() >= inner.max_queue_size {
                state.total_rejected += 1;
                return Err(ThrottleError::QueueFull);
            }
        }

        let (tx, mut rx) = oneshot::channel();
        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        let waiter = Arc::new(Waiter {
            id,
            claimed: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            enqueued_at: Instant::now(),
        });

        {
            let mut state = inner.state.lock();
            state.queue.push_back(waiter.clone());
            state.peak_queue_size = state.peak_queue_size.max(state.queue.len());
        }

        // If `acquire`'s future is dropped before it resolves (caller-side
        // timeout, task abort, select! race elsewhere), this guard cleans
        // up whatever state the waiter was in so neither a stale queue
        // entry nor a transferred slot is ever leaked (spec §5
        // "Cancellation must not leak a queued retrieval or a slot").
        let mut guard = AbandonGuard {
            inner: Some(inner.clone()),
            waiter: waiter.clone(),
            id,
        };

        let deadline = tokio::time::Instant::now() + inner.queue_timeout;

        let outcome = loop {
            tokio::select! {
                res = &mut rx => {
                    res.ok();
                    break Ok(());
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if waiter.claimed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                        let mut state = inner.state.lock();
                        state.queue.retain(|w| w.id != id);
                        state.total_timed_out += 1;
                        debug!(waiter_id = id, "throttle waiter timed out");
                        break Err(ThrottleError::QueueTimeout);
                    }
                    // Lost the claim race to a concurrent release(): it has
                    // already committed to waking us. Wait for the actual
                    // signal rather than reporting a spurious timeout.
                    let res = (&mut rx).await;
                    res.ok();
                    break Ok(());
                }
            }
        };

        guard.disarm();

        match outcome {
            Ok(()) => {
                record_wait(&inner, &waiter);
                Ok(Permit { inner, released: AtomicBool::new(false) })
            }
            Err(e) => Err(e),
        }
    }

    fn do_release(inner: &Arc<Inner>) {
        {
            let mut state = inner.state.lock();
            state.total_completed += 1;
        }

        loop {
            let mut state = inner.state.lock();
            let Some(waiter) = state.queue.pop_front() else {
                state.active = state.active.saturating_sub(1);
                return;
            };
            drop(state);

            if waiter.claimed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                state = inner.state.lock();
                state.total_admitted += 1;
                drop(state);
                if let Some(tx) = waiter.tx.lock().take() {
                    let _ = tx.send(());
                }
                return;
            }
            // This waiter already claimed itself via timeout; it was
            // already removed from accounting there. Keep looking for the
            // next live waiter so the slot isn't silently dropped.
        }
    }

    pub fn stats(&self) -> ThrottleStats {
        let state = self.0.state.lock();
        let avg_queue_wait_ms = if state.wait_count > 0 {
            state.wait_sum_ms as f64 / state.wait_count as f64
        } else {
            0.0
        };
        ThrottleStats {
            active: state.active,
            queue_len: state.queue.len(),
            total_requests: state.total_requests,
            total_admitted: state.total_admitted,
            total_rejected: state.total_rejected,
            total_timed_out: state.total_timed_out,
            total_completed: state.total_completed,
            peak_active: state.peak_active,
            peak_queue_size: state.peak_queue_size,
            avg_queue_wait_ms,
        }
    }
}

/// Cleans up a queued waiter if `acquire`'s future is dropped before it
/// reaches a terminal outcome of its own. Call `disarm()` once the waiter
/// has been resolved through the normal path (woken, timed out, or the
/// permit handed back) so the cleanup never double-runs.
struct AbandonGuard {
    inner: Option<Arc<Inner>>,
    waiter: Arc<Waiter>,
    id: u64,
}

impl AbandonGuard {
    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        if self
            .waiter
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // Never admitted or woken: drop the stale queue entry and
            // account for it the same way a timeout would, so the
            // active+completed+rejected+timedOut conservation invariant
            // still holds for a waiter that never received a slot.
            let mut state = inner.state.lock();
            state.queue.retain(|w| w.id != self.id);
            state.total_timed_out += 1;
            debug!(waiter_id = self.id, "abandoned throttle waiter removed from queue");
        } else {
            // A concurrent release() already claimed this waiter and
            // transferred a slot to it (or is about to send on the
            // oneshot); since we are abandoning the acquire before
            // constructing a Permit, pass the slot along to the next
            // waiter instead of leaking it.
            debug!(waiter_id = self.id, "abandoned throttle waiter had a transferred slot, passing it on");
            Throttle::do_release(&inner);
        }
    }
}

fn record_wait(inner: &Arc<Inner>, waiter: &Waiter) {
    let wait_ms = waiter.enqueued_at.elapsed().as_millis() as u64;
    let mut state = inner.state.lock();
    state.wait_sum_ms += wait_ms;
    state.wait_count += 1;
}
