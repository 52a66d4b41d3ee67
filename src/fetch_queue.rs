//! Priority-aware concurrency limiter for outbound requests to one host.
//!
//! At most `limit` tasks run at once. Waiters are woken lowest priority
//! first, FIFO among equal priorities. Each task is jittered after it gets
//! its slot, so a burst of submissions does not hit the host in lockstep.
//! There is no circuit breaker: a failing task only affects its caller.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::delay::Delay;

pub struct FetchQueue {
    limit: usize,
    jitter_ms: (u64, u64),
    delay: Delay,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    running: usize,
    next_seq: u64,
    waiting: BinaryHeap<Waiter>,
}

struct Waiter {
    priority: u64,
    seq: u64,
    wake: oneshot::Sender<()>,
}

// BinaryHeap is a max-heap; invert so the smallest (priority, seq) pops first.
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl FetchQueue {
    pub fn new(limit: usize, jitter_ms: (u64, u64), delay: Delay) -> Self {
        Self {
            limit: limit.max(1),
            jitter_ms,
            delay,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.lock().running
    }

    /// Tasks parked waiting for a slot.
    pub fn queued(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Run `task` once a slot is free. Lower `priority` runs earlier.
    pub async fn submit<F, Fut, T>(&self, priority: u64, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = self.acquire(priority).await;
        self.delay.jitter(self.jitter_ms.0, self.jitter_ms.1).await;
        task().await
    }

    async fn acquire(&self, priority: u64) -> Slot<'_> {
        let rx = {
            let mut st = self.lock();
            if st.running < self.limit && st.waiting.is_empty() {
                st.running += 1;
                return Slot { queue: self };
            }
            let (tx, rx) = oneshot::channel();
            let seq = st.next_seq;
            st.next_seq += 1;
            st.waiting.push(Waiter {
                priority,
                seq,
                wake: tx,
            });
            rx
        };

        // `release` hands its slot over without decrementing `running`.
        let mut pending = Pending {
            queue: self,
            rx: Some(rx),
        };
        if let Some(rx) = pending.rx.as_mut() {
            // The sender stays in the heap until handoff, so this only resolves Ok.
            let _ = rx.await;
        }
        pending.rx = None;
        Slot { queue: self }
    }

    fn release(&self) {
        let mut st = self.lock();
        while let Some(next) = st.waiting.pop() {
            if next.wake.send(()).is_ok() {
                return;
            }
        }
        st.running = st.running.saturating_sub(1);
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

struct Slot<'a> {
    queue: &'a FetchQueue,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.queue.release();
    }
}

/// A waiter that gets cancelled after its slot was already handed over must
/// pass the slot on.
struct Pending<'a> {
    queue: &'a FetchQueue,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.queue.release();
            }
        }
    }
}
