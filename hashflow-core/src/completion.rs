//! Completion signal shared between an orchestrating caller and the terminal stages it spawns.
//!
//! Each terminal stage holds a [StageGuard] obtained from [CompletionSignal::register] before the
//! stage is spawned. The guard counts the signal down exactly once, either through
//! [StageGuard::done] or when it is dropped, and [CompletionSignal::wait] returns once no guard is
//! outstanding.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    outstanding: AtomicUsize,
    notify: Notify,
}

impl Inner {
    fn count_down(&self) {
        // the last stage out wakes every waiter
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<Inner>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one more terminal stage.
    pub fn register(&self) -> StageGuard {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        StageGuard {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Number of registered stages that have not signaled yet.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Wait until every registered stage has signaled. Returns immediately when none is
    /// outstanding.
    pub async fn wait(&self) {
        loop {
            // Notified is registered on creation, so a count down racing with the check below
            // still wakes us.
            let notified = self.inner.notify.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Proof that a terminal stage still has to signal. Consumed by [StageGuard::done].
#[derive(Debug)]
#[must_use = "dropping the guard signals completion immediately"]
pub struct StageGuard {
    inner: Option<Arc<Inner>>,
}

impl StageGuard {
    pub fn done(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.count_down();
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.count_down();
        }
    }
}
