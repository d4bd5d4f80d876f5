//! Runtime exception attribution.
//!
//! Every discovered jar gets its class set indexed by [`JarId`]. A thrown
//! exception's stack frames are then matched frame by frame: the owners of
//! each matched frame are *intersected*, not unioned. That disambiguates
//! the case where two requested versions of one bundle are loaded at once:
//! only the identity present on the whole throwing stack survives the
//! intersection.

use crate::events::ExceptionTrace;
use crate::jar;
use dashmap::DashMap;
use jarvault_core::error::{BundleError, Result};
use jarvault_core::model::JarId;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Default)]
pub struct ExceptionAttributor {
    index: DashMap<JarId, Arc<HashSet<String>>>,
}

impl ExceptionAttributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a jar's class set, replacing any previous entry for the same
    /// identity (re-resolution to a different concrete version reuses the
    /// slot). The archive read runs on the blocking pool.
    pub async fn index_jar(&self, id: JarId, path: PathBuf) -> Result<()> {
        let indexed_path = path.clone();
        let classes = tokio::task::spawn_blocking(move || jar::jar_classes(&indexed_path))
            .await
            .map_err(|e| BundleError::Archive {
                path,
                source: Box::new(e),
            })??;
        tracing::debug!(id = %id, classes = classes.len(), "indexed jar classes");
        self.index.insert(id, Arc::new(classes));
        Ok(())
    }

    /// Direct index insertion for pre-computed class sets.
    pub fn insert(&self, id: JarId, classes: HashSet<String>) {
        self.index.insert(id, Arc::new(classes));
    }

    pub fn remove(&self, id: &JarId) {
        self.index.remove(id);
    }

    pub fn remove_bundle(&self, bundle: &str) {
        self.index.retain(|id, _| id.bundle != bundle);
    }

    pub fn clear(&self) {
        self.index.clear();
    }

    /// Matches an exception to the loaded identities responsible for it.
    ///
    /// Frames that match nothing in the index are neutral; the result is
    /// the intersection of owner sets over frames that matched something.
    /// Empty result means no attribution.
    pub fn attribute(&self, trace: &ExceptionTrace, follow_causes: bool) -> HashSet<JarId> {
        let mut result: Option<HashSet<JarId>> = None;

        let mut current = Some(trace);
        while let Some(exception) = current {
            for frame in &exception.frames {
                let class = jar::normalize_frame_class(&frame.declaring_class);
                let owners: HashSet<JarId> = self
                    .index
                    .iter()
                    .filter(|entry| entry.value().contains(class))
                    .map(|entry| entry.key().clone())
                    .collect();
                if owners.is_empty() {
                    continue;
                }
                result = Some(match result {
                    None => owners,
                    Some(prev) => prev.intersection(&owners).cloned().collect(),
                });
                if result.as_ref().is_some_and(HashSet::is_empty) {
                    return HashSet::new();
                }
            }
            current = if follow_causes {
                exception.cause.as_deref()
            } else {
                None
            };
        }

        result.unwrap_or_default()
    }
}
