//! Completion barrier joining independent asynchronous units
//!
//! Each pushed unit starts immediately and signals done exactly once
//! through its handle; `wait` resolves once every unit has signaled. This
//! is the primitive joining "network is idle" and "page load finished"
//! into a single readiness signal.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

struct BarrierInner {
    pending: AtomicUsize,
    notify: Notify,
}

/// Completion handle passed to a barrier unit. `done` is idempotent:
/// only the first call decrements the barrier.
#[derive(Clone)]
pub struct BarrierHandle {
    inner: Arc<BarrierInner>,
    signaled: Arc<AtomicBool>,
}

impl BarrierHandle {
    pub fn done(&self) {
        if self.signaled.swap(true, Ordering::SeqCst) {
            return;
        }
        let remaining = self.inner.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(remaining, "barrier unit done");
        if remaining == 0 {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_done(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }
}

pub struct AsyncBarrier {
    inner: Arc<BarrierInner>,
}

impl AsyncBarrier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                pending: AtomicUsize::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Register a unit and start it immediately on the runtime. Units run
    /// concurrently with respect to each other; pushing never blocks.
    pub fn push<F, Fut>(&self, unit: F) -> BarrierHandle
    where
        F: FnOnce(BarrierHandle) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let handle = BarrierHandle {
            inner: self.inner.clone(),
            signaled: Arc::new(AtomicBool::new(false)),
        };
        tokio::spawn(unit(handle.clone()));
        handle
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every pushed unit has signaled done. Resolves
    /// immediately when nothing was pushed.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for AsyncBarrier {
    fn default() -> Self {
        Self::new()
    }
}
