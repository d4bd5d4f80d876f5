//! Debounced host cache invalidation.
//!
//! The host re-queries synchronously and repeatedly within a short window
//! after any state change, so the "drop your cached view" signal waits
//! until no queries have arrived for a quiet period. One waiter at a time,
//! enforced by compare-and-set; queries landing while the waiter sleeps
//! push the deadline out.

use crate::events::HostHooks;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

pub struct InvalidationDebouncer {
    hooks: Arc<dyn HostHooks>,
    quiet: Duration,
    last_query: Mutex<Instant>,
    pending: AtomicBool,
    waiter: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationDebouncer {
    pub fn new(hooks: Arc<dyn HostHooks>, quiet: Duration) -> Arc<Self> {
        Arc::new(Self {
            hooks,
            quiet,
            last_query: Mutex::new(Instant::now()),
            pending: AtomicBool::new(false),
            waiter: Mutex::new(None),
        })
    }

    /// Records a host query; extends any in-flight quiet-period wait.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_query.lock() {
            *last = Instant::now();
        }
    }

    /// Requests an invalidation notification. Coalesces with any already
    /// pending request; the host hears about a burst of changes once.
    pub fn schedule(self: &Arc<Self>) {
        self.touch();
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let debouncer = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let elapsed = debouncer
                    .last_query
                    .lock()
                    .map(|last| last.elapsed())
                    .unwrap_or(debouncer.quiet);
                if elapsed >= debouncer.quiet {
                    break;
                }
                tokio::time::sleep(debouncer.quiet - elapsed).await;
            }
            debouncer.pending.store(false, Ordering::Release);
            tracing::debug!("quiet period elapsed, invalidating host caches");
            debouncer.hooks.invalidate_caches().await;
        });
        if let Ok(mut waiter) = self.waiter.lock() {
            *waiter = Some(handle);
        }
    }

    /// Aborts any in-flight waiter. The pending flag is reset so a later
    /// `schedule` starts fresh.
    pub fn shutdown(&self) {
        if let Ok(mut waiter) = self.waiter.lock()
            && let Some(handle) = waiter.take()
        {
            handle.abort();
        }
        self.pending.store(false, Ordering::Release);
    }
}
