//! Error injection controller for the in-memory store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

/// The class of a command, as far as failure and latency injection is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Write,
    Read,
    Delete,
    Other,
}

/// Controller for injecting failures into [super::InMemoryClient].
///
/// Lets tests force command errors (counted or per key), simulate a dead connection, and
/// slow commands down to exercise back-pressure.
#[derive(Debug, Default)]
pub struct ErrorInjector {
    /// Fail the next N write commands.
    fail_next_writes: AtomicUsize,
    /// Fail the next N read commands.
    fail_next_reads: AtomicUsize,
    /// Fail the next N delete commands.
    fail_next_deletes: AtomicUsize,
    /// Every command whose key is in this set fails.
    failing_keys: RwLock<HashSet<String>>,
    /// Every command fails with a transport error while set.
    transport_down: AtomicBool,
    write_latency_ms: AtomicU64,
    read_latency_ms: AtomicU64,
}

impl ErrorInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next N write commands.
    pub fn fail_writes(&self, count: usize) {
        self.fail_next_writes.store(count, Ordering::Relaxed);
    }

    /// Fail the next N read commands.
    pub fn fail_reads(&self, count: usize) {
        self.fail_next_reads.store(count, Ordering::Relaxed);
    }

    /// Fail the next N delete commands.
    pub fn fail_deletes(&self, count: usize) {
        self.fail_next_deletes.store(count, Ordering::Relaxed);
    }

    /// Fail every command addressing `key` until [Self::clear_failing_keys] is called.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.failing_keys.write().insert(key.into());
    }

    pub fn clear_failing_keys(&self) {
        self.failing_keys.write().clear();
    }

    /// Simulate the connection dying underneath the client.
    pub fn break_transport(&self) {
        self.transport_down.store(true, Ordering::SeqCst);
    }

    pub fn restore_transport(&self) {
        self.transport_down.store(false, Ordering::SeqCst);
    }

    pub fn set_write_latency(&self, ms: u64) {
        self.write_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub fn set_read_latency(&self, ms: u64) {
        self.read_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn is_transport_down(&self) -> bool {
        self.transport_down.load(Ordering::SeqCst)
    }

    pub(crate) fn fails_key(&self, key: &str) -> bool {
        self.failing_keys.read().contains(key)
    }

    /// Check and decrement the failure counter for the kind.
    pub(crate) fn should_fail(&self, kind: CommandKind) -> bool {
        match kind {
            CommandKind::Write => Self::decrement_counter(&self.fail_next_writes),
            CommandKind::Read => Self::decrement_counter(&self.fail_next_reads),
            CommandKind::Delete => Self::decrement_counter(&self.fail_next_deletes),
            CommandKind::Other => false,
        }
    }

    pub(crate) async fn apply_latency(&self, kind: CommandKind) {
        let ms = match kind {
            CommandKind::Write => self.write_latency_ms.load(Ordering::Relaxed),
            CommandKind::Read => self.read_latency_ms.load(Ordering::Relaxed),
            CommandKind::Delete | CommandKind::Other => 0,
        };
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Decrement a counter, returning true if it was > 0.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok()
    }
}
