//! In-memory resolution state.
//!
//! The main map keys on [`JarId`] (resolved version excluded from
//! identity). A secondary "lifecycle" cache serves repeated lookups within
//! one external analysis pass without re-checking bundle completeness; it
//! is dropped on any invalidation.

use dashmap::{DashMap, DashSet};
use jarvault_core::model::{
    ArtifactCoordinate, ArtifactState, BundleDescriptor, CachedArtifact, JarId, RequestedVersion,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Key of one resolution unit.
pub type BundleKey = (String, RequestedVersion);

#[derive(Debug, Default)]
pub struct StateStore {
    states: DashMap<JarId, ArtifactState>,
    lifecycle: DashMap<BundleKey, HashMap<ArtifactCoordinate, PathBuf>>,
    disabled: DashSet<String>,
    retries: DashMap<BundleKey, u32>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &JarId) -> Option<ArtifactState> {
        self.states.get(id).map(|s| s.clone())
    }

    pub fn set(&self, id: JarId, state: ArtifactState) {
        self.states.insert(id, state);
    }

    /// Every `(bundle, requested)` key currently tracked.
    pub fn tracked_keys(&self) -> Vec<BundleKey> {
        let mut keys: HashSet<BundleKey> = HashSet::new();
        for entry in &self.states {
            keys.insert((entry.key().bundle.clone(), entry.key().requested.clone()));
        }
        keys.into_iter().collect()
    }

    /// Currently cached members of one bundle, complete or not. Fed back
    /// into the resolver as its disk-cache reuse candidates.
    pub fn known_cached(
        &self,
        descriptor: &BundleDescriptor,
        requested: &RequestedVersion,
    ) -> HashMap<ArtifactCoordinate, CachedArtifact> {
        let mut known = HashMap::new();
        for coordinate in &descriptor.coordinates {
            let id = JarId {
                bundle: descriptor.name.clone(),
                coordinate: coordinate.clone(),
                requested: requested.clone(),
            };
            if let Some(state) = self.states.get(&id)
                && let Some(cached) = state.as_cached()
            {
                known.insert(coordinate.clone(), cached.clone());
            }
        }
        known
    }

    /// Paths of a fully consistent bundle: every coordinate `Cached` at the
    /// same resolved version. `None` as soon as any member is missing,
    /// failed, or disagrees on version.
    pub fn complete_bundle(
        &self,
        descriptor: &BundleDescriptor,
        requested: &RequestedVersion,
    ) -> Option<HashMap<ArtifactCoordinate, PathBuf>> {
        let known = self.known_cached(descriptor, requested);
        if known.len() != descriptor.coordinates.len() {
            return None;
        }
        let mut resolved = None;
        for cached in known.values() {
            match &resolved {
                None => resolved = Some(cached.resolved.clone()),
                Some(v) if *v == cached.resolved => {}
                Some(_) => return None,
            }
        }
        Some(
            known
                .into_iter()
                .map(|(c, a)| (c, a.jar.path))
                .collect(),
        )
    }

    pub fn lifecycle_get(
        &self,
        key: &BundleKey,
        coordinate: &ArtifactCoordinate,
    ) -> Option<PathBuf> {
        self.lifecycle
            .get(key)
            .and_then(|paths| paths.get(coordinate).cloned())
    }

    pub fn lifecycle_insert(&self, key: BundleKey, paths: HashMap<ArtifactCoordinate, PathBuf>) {
        self.lifecycle.insert(key, paths);
    }

    pub fn clear_lifecycle(&self) {
        self.lifecycle.clear();
    }

    pub fn disable(&self, bundle: &str) {
        self.disabled.insert(bundle.to_string());
    }

    pub fn is_disabled(&self, bundle: &str) -> bool {
        self.disabled.contains(bundle)
    }

    /// Records one more transient failure; returns the attempt count so
    /// far.
    pub fn record_retry(&self, key: BundleKey) -> u32 {
        let mut attempts = self.retries.entry(key).or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub fn retry_count(&self, key: &BundleKey) -> u32 {
        self.retries.get(key).map_or(0, |attempts| *attempts)
    }

    pub fn reset_retries(&self, key: &BundleKey) {
        self.retries.remove(key);
    }

    /// Drops all state. Disablement survives a state clear; it is a user
    /// decision, not a cache entry.
    pub fn clear(&self) {
        self.states.clear();
        self.lifecycle.clear();
        self.retries.clear();
    }

    /// States of one bundle's members, for status aggregation.
    pub fn member_states(
        &self,
        descriptor: &BundleDescriptor,
        requested: &RequestedVersion,
    ) -> Vec<Option<ArtifactState>> {
        descriptor
            .coordinates
            .iter()
            .map(|coordinate| {
                self.get(&JarId {
                    bundle: descriptor.name.clone(),
                    coordinate: coordinate.clone(),
                    requested: requested.clone(),
                })
            })
            .collect()
    }
}
