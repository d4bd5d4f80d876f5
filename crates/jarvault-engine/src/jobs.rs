//! Resolution job registry.
//!
//! At most one live job per `(bundle, requested version)` key. Registration
//! is a compare-and-set against the map entry; a duplicate never spawns.
//! Completion removal is id-checked so it can only remove the registration
//! it belongs to, which keeps the register/complete race consistent even
//! when a job finishes before its own registration is published.

use crate::store::BundleKey;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

struct Job {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<BundleKey, Job>,
    next_id: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawns `work` for `key` unless a job for that key is already live.
    /// Returns whether the job was started; a duplicate is simply dropped.
    pub fn spawn<F>(self: &Arc<Self>, key: BundleKey, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.jobs.entry(key.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(bundle = key.0, requested = %key.1, "resolution already in flight");
                false
            }
            Entry::Vacant(slot) => {
                let registry = Arc::clone(self);
                // The vacant entry holds the shard lock until `insert`
                // below completes, so this removal cannot run before the
                // registration is visible.
                let handle = tokio::spawn(async move {
                    work.await;
                    registry.jobs.remove_if(&key, |_, job| job.id == id);
                });
                slot.insert(Job { id, handle });
                true
            }
        }
    }

    pub fn is_running(&self, key: &BundleKey) -> bool {
        self.jobs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Aborts every in-flight job and waits for each to finish winding
    /// down. Required before any state clear may proceed.
    pub async fn cancel_all(&self) {
        let keys: Vec<BundleKey> = self.jobs.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::new();
        for key in keys {
            if let Some((_, job)) = self.jobs.remove(&key) {
                job.handle.abort();
                handles.push(job.handle);
            }
        }
        for handle in handles {
            // Either ran to completion or reports cancellation; both are
            // fine, the point is that nothing is still running afterwards.
            let _ = handle.await;
        }
    }
}
