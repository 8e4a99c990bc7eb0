//! Compilation lock and busy-thread tracking
//!
//! Two pieces of state, both owned by one resolver:
//! - a mutex serializing compiles that target a durable artifact name
//! - the busy set: threads currently running a compile/definition step
//!   against cached loaders
//!
//! Destructive cache operations (unload-all) first call
//! [`ConcurrencyGuard::await_quiescent`] on the thread that may still be
//! inside loaded code. The wait is bounded: once the attempt budget is
//! spent the caller gets [`Quiescence::TimedOut`] and decides whether to
//! proceed anyway. Proceeding after a timeout is a known race window.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::config::QuiescenceConfig;

/// Outcome of a bounded quiescence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quiescence {
    /// Thread was not busy at the first check
    Idle,
    /// Thread left the busy set after `polls` sleeps
    Drained { polls: u32 },
    /// Thread was still busy after `polls` sleeps
    TimedOut { polls: u32 },
}

impl Quiescence {
    /// Whether the thread is known to have left dynamically loaded code
    pub fn is_quiescent(&self) -> bool {
        !matches!(self, Quiescence::TimedOut { .. })
    }
}

/// Holds the durable-compile lock until dropped
pub struct CompileLock<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Keeps the current thread in the busy set until dropped
pub struct BusyMarker<'a> {
    busy: &'a DashMap<ThreadId, usize>,
    thread: ThreadId,
}

impl Drop for BusyMarker<'_> {
    fn drop(&mut self) {
        let mut cleared = false;
        if let Entry::Occupied(mut entry) = self.busy.entry(self.thread) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
                cleared = true;
            }
        }
        tracing::debug!(thread = ?self.thread, cleared, "busy marker released");
    }
}

/// Per-resolver concurrency state
pub struct ConcurrencyGuard {
    compile_lock: Mutex<()>,
    /// Thread → nesting depth of busy markers
    busy: DashMap<ThreadId, usize>,
    quiescence: QuiescenceConfig,
}

impl ConcurrencyGuard {
    pub fn new(quiescence: QuiescenceConfig) -> Self {
        Self {
            compile_lock: Mutex::new(()),
            busy: DashMap::new(),
            quiescence,
        }
    }

    /// Block until the durable-compile lock is free
    pub fn lock_compilation(&self) -> CompileLock<'_> {
        CompileLock {
            _guard: self.compile_lock.lock(),
        }
    }

    /// Mark the current thread busy until the returned marker drops.
    ///
    /// Markers nest: the thread leaves the set when its outermost marker
    /// is released, including during unwinding.
    pub fn mark_busy(&self) -> BusyMarker<'_> {
        let thread = thread::current().id();
        let mut depth = self.busy.entry(thread).or_insert(0);
        *depth += 1;
        tracing::debug!(thread = ?thread, depth = *depth, "busy marker acquired");
        drop(depth);
        BusyMarker {
            busy: &self.busy,
            thread,
        }
    }

    /// Run `body` with the current thread marked busy
    pub fn with_busy_marker<T>(&self, body: impl FnOnce() -> T) -> T {
        let _marker = self.mark_busy();
        body()
    }

    pub fn is_busy(&self, thread: ThreadId) -> bool {
        self.busy.contains_key(&thread)
    }

    /// Number of threads currently marked busy
    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }

    /// Wait with the configured interval and attempt budget
    pub fn await_quiescent(&self, thread: ThreadId) -> Quiescence {
        self.await_quiescent_with(thread, self.quiescence.poll_interval(), self.quiescence.max_attempts)
    }

    /// Poll the busy set until `thread` leaves it or `max_attempts` sleeps
    /// of `interval` have elapsed. Never blocks longer than
    /// `interval * max_attempts` plus scheduling slack.
    pub fn await_quiescent_with(
        &self,
        thread: ThreadId,
        interval: Duration,
        max_attempts: u32,
    ) -> Quiescence {
        if !self.is_busy(thread) {
            return Quiescence::Idle;
        }

        let mut polls = 0;
        while self.is_busy(thread) {
            if polls == max_attempts {
                tracing::warn!(
                    thread = ?thread,
                    polls,
                    "thread still inside loaded code, giving up waiting"
                );
                return Quiescence::TimedOut { polls };
            }
            thread::sleep(interval);
            polls += 1;
            tracing::debug!(thread = ?thread, polls, "waiting for thread to leave loaded code");
        }

        Quiescence::Drained { polls }
    }
}
