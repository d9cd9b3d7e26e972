//! In-memory work queue.
//!
//! A `VecDeque` guarded by a mutex, with a `Notify` to wake idle workers
//! and spawned sleep tasks for backoff re-delivery. Good enough for a
//! single-process deployment and for deterministic tests; at-least-once
//! semantics match what a broker would provide.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::{Delivery, QueueError, RetryPolicy, WorkItem, WorkQueue};

struct Inner {
    items: Mutex<VecDeque<Delivery>>,
    notify: Notify,
    closed: AtomicBool,
    policy: RetryPolicy,
}

pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl MemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                policy,
            }),
        }
    }

    /// Stop delivering; pending dequeues wake up with [`QueueError::Closed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Non-blocking pop, used by tests to drain deterministically.
    pub fn try_pop(&self) -> Option<Delivery> {
        self.inner.items.lock().expect("queue poisoned").pop_front()
    }

    fn push(inner: &Inner, delivery: Delivery) {
        inner
            .items
            .lock()
            .expect("queue poisoned")
            .push_back(delivery);
        inner.notify.notify_one();
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Self::push(&self.inner, Delivery { item, attempt: 1 });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            if let Some(delivery) = self.try_pop() {
                return Ok(delivery);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(QueueError::Closed);
            }
            // Heartbeat alongside the wakeup guards against a notify racing
            // the pop-then-wait window.
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
            }
        }
    }

    async fn retry(&self, delivery: Delivery) -> Result<(), QueueError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let Some(delay) = self.inner.policy.delay_for(delivery.attempt) else {
            return Err(QueueError::Exhausted(delivery.attempt));
        };
        let delay = self.inner.policy.jittered(delay);
        let next = Delivery {
            item: delivery.item,
            attempt: delivery.attempt + 1,
        };

        let inner = self.inner.clone();
        if delay.is_zero() {
            Self::push(&inner, next);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !inner.closed.load(Ordering::SeqCst) {
                    Self::push(&inner, next);
                }
            });
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.items.lock().expect("queue poisoned").len()
    }
}
