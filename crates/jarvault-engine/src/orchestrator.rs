//! Engine orchestration.
//!
//! [`BundleVault`] owns all engine state: the resolution state store, the
//! job registry, the attribution index, the invalidation debouncer, and
//! (once started) the filesystem monitor plus the periodic actualization
//! task. Everything it spawns is cancelled by [`BundleVault::shutdown`];
//! there is no ambient global state.

use crate::attribution::ExceptionAttributor;
use crate::config::VaultConfig;
use crate::debounce::InvalidationDebouncer;
use crate::events::{ExceptionTrace, HostHooks};
use crate::jobs::JobRegistry;
use crate::monitor::{ChangeEvent, FsMonitor, RootKind};
use crate::store::{BundleKey, StateStore};
use jarvault_core::error::Result;
use jarvault_core::fetch::HttpFetcher;
use jarvault_core::model::{
    ArtifactCoordinate, ArtifactState, BundleDescriptor, BundleStatus, CachedArtifact, Jar, JarId,
    RequestedVersion, ResolvedVersion, RuntimeVersion,
};
use jarvault_core::naming::NamingCompiler;
use jarvault_maven::layout;
use jarvault_maven::resolver::{BundleResolver, LocatorResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tokio::task::JoinHandle;

pub struct BundleVault {
    inner: Arc<VaultInner>,
}

struct VaultInner {
    config: RwLock<Arc<VaultConfig>>,
    descriptors: RwLock<Arc<Vec<BundleDescriptor>>>,
    store: StateStore,
    jobs: Arc<JobRegistry>,
    resolver: BundleResolver,
    attributor: ExceptionAttributor,
    debouncer: Arc<InvalidationDebouncer>,
    hooks: Arc<dyn HostHooks>,
    naming: NamingCompiler,
    monitor: OnceLock<FsMonitor>,
    /// Serializes clear operations; taken only after every in-flight job
    /// has been cancelled and awaited.
    clear_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BundleVault {
    pub fn new(config: VaultConfig, hooks: Arc<dyn HostHooks>) -> Self {
        let debouncer =
            InvalidationDebouncer::new(Arc::clone(&hooks), config.settings.quiet_period());
        let descriptors = Arc::new(config.descriptors());
        Self {
            inner: Arc::new(VaultInner {
                config: RwLock::new(Arc::new(config)),
                descriptors: RwLock::new(descriptors),
                store: StateStore::new(),
                jobs: JobRegistry::new(),
                resolver: BundleResolver::new(Arc::new(HttpFetcher::new())),
                attributor: ExceptionAttributor::new(),
                debouncer,
                hooks,
                naming: NamingCompiler::new(),
                monitor: OnceLock::new(),
                clear_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts the filesystem monitor, its event pump, and (if configured)
    /// the periodic actualization task.
    pub async fn start(&self) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let monitor = FsMonitor::spawn(tx)?;

        let config = self.inner.current_config();
        let cache_dir = config.cache_root.join(config.runtime_version.as_str());
        tokio::fs::create_dir_all(&cache_dir).await?;
        monitor.register_root(&cache_dir, RootKind::CacheDir);
        for root in config.local_repository_roots() {
            monitor.register_root(root, RootKind::LocalRepo);
        }
        let _ = self.inner.monitor.set(monitor);

        let pump_inner = Arc::clone(&self.inner);
        let pump = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                pump_inner.handle_change(change);
            }
        });
        self.inner.push_task(pump);

        if let Some(interval) = config.settings.auto_actualization_interval() {
            let tick_inner = Arc::clone(&self.inner);
            let ticker = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    tracing::debug!("periodic actualization tick");
                    tick_inner.actualize_tracked(false);
                }
            });
            self.inner.push_task(ticker);
        }
        Ok(())
    }

    /// The host's lookup trigger: given a path it wants substituted,
    /// determine the owning bundle, coordinate and requested version, and
    /// serve the cached file if the whole bundle is consistent.
    pub async fn request_artifact(&self, requested_path: &str) -> Option<PathBuf> {
        let file_name = Path::new(requested_path).file_name()?.to_str()?.to_string();
        let (coordinate, requested) = self.inner.detect_request(&file_name)?;
        self.get_artifact_path(&coordinate, &requested).await
    }

    /// Returns a cached path only when *every* coordinate of the owning
    /// bundle is cached at the same resolved version. On a miss, a
    /// background rescan-then-resolve job is triggered and `None` is
    /// returned immediately.
    pub async fn get_artifact_path(
        &self,
        coordinate: &ArtifactCoordinate,
        requested: &RequestedVersion,
    ) -> Option<PathBuf> {
        let inner = &self.inner;
        inner.debouncer.touch();

        let descriptor = inner.descriptor_for_coordinate(coordinate)?;
        if inner.store.is_disabled(&descriptor.name) {
            return None;
        }
        let key: BundleKey = (descriptor.name.clone(), requested.clone());

        if let Some(path) = inner.store.lifecycle_get(&key, coordinate) {
            return Some(path);
        }
        if let Some(paths) = inner.store.complete_bundle(&descriptor, requested) {
            let result = paths.get(coordinate).cloned();
            inner.store.lifecycle_insert(key, paths);
            return result;
        }

        inner.spawn_resolution(descriptor, requested.clone());
        None
    }

    /// Re-resolves every tracked bundle. Manual refresh: retry budgets are
    /// reset and even `NotFound` bundles are retried.
    pub fn run_actualization(&self) {
        self.inner.actualize_tracked(true);
    }

    /// Cancels all in-flight work and drops in-memory state. On-disk
    /// artifacts stay.
    pub async fn clear_state(&self) {
        let inner = &self.inner;
        let _guard = inner.clear_lock.lock().await;
        inner.jobs.cancel_all().await;
        inner.store.clear();
        inner.attributor.clear();
        inner.hooks.invalidate_caches().await;
    }

    /// [`Self::clear_state`] plus deletion of the on-disk cache for the
    /// current runtime version.
    pub async fn clear_caches(&self) {
        let inner = &self.inner;
        let _guard = inner.clear_lock.lock().await;
        inner.jobs.cancel_all().await;

        let config = inner.current_config();
        let cache_dir = config.cache_root.join(config.runtime_version.as_str());
        {
            let _suppress = inner.monitor.get().map(FsMonitor::mark_self_update);
            if let Err(e) = tokio::fs::remove_dir_all(&cache_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %cache_dir.display(), error = %e, "failed to delete cache dir");
                }
            }
            if let Err(e) = tokio::fs::create_dir_all(&cache_dir).await {
                tracing::warn!(dir = %cache_dir.display(), error = %e, "failed to recreate cache dir");
            }
        }
        // Deleting the root invalidated its watch; put it back so external
        // changes keep being detected.
        if let Some(monitor) = inner.monitor.get() {
            monitor.register_root(&cache_dir, RootKind::CacheDir);
        }

        inner.store.clear();
        inner.attributor.clear();
        inner.hooks.invalidate_caches().await;
    }

    /// Runtime exception intake. Returns the attributed identities;
    /// bundles with `ignore_runtime_exceptions` set are reported but not
    /// flagged.
    pub fn report_exception(&self, trace: &ExceptionTrace) -> HashSet<JarId> {
        let inner = &self.inner;
        let config = inner.current_config();
        let matched = inner
            .attributor
            .attribute(trace, config.settings.follow_exception_causes);
        if matched.is_empty() {
            return matched;
        }

        let descriptors = inner.current_descriptors();
        for id in &matched {
            let Some(descriptor) = descriptors.iter().find(|d| d.name == id.bundle) else {
                continue;
            };
            if descriptor.ignore_runtime_exceptions {
                tracing::debug!(bundle = id.bundle, "runtime exception ignored by configuration");
                continue;
            }
            tracing::warn!(id = %id, "runtime exception attributed");
            inner
                .hooks
                .status_changed(&id.bundle, &id.requested, BundleStatus::ExceptionInRuntime);
            if config.settings.auto_disable_on_exception {
                self.disable_bundle(&id.bundle, &id.requested);
            }
        }
        matched
    }

    /// Marks a bundle disabled; it no longer serves artifacts until the
    /// configuration is replaced.
    pub fn disable_bundle(&self, bundle: &str, requested: &RequestedVersion) {
        self.inner.store.disable(bundle);
        self.inner
            .hooks
            .status_changed(bundle, requested, BundleStatus::Disabled);
        self.inner.debouncer.schedule();
    }

    /// Aggregated per-(bundle, requested version) status snapshot for
    /// diagnostics display.
    pub fn bundle_statuses(&self) -> Vec<(String, RequestedVersion, BundleStatus)> {
        let inner = &self.inner;
        let descriptors = inner.current_descriptors();
        let mut statuses: Vec<(String, RequestedVersion, BundleStatus)> = inner
            .store
            .tracked_keys()
            .into_iter()
            .filter_map(|key| {
                let descriptor = descriptors.iter().find(|d| d.name == key.0)?;
                let status = inner.status_of(descriptor, &key);
                Some((key.0, key.1, status))
            })
            .collect();
        statuses.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        statuses
    }

    /// Replaces the configuration: re-derives descriptors and the watch
    /// set, then re-runs pending resolutions.
    pub async fn update_config(&self, config: VaultConfig) -> Result<()> {
        let inner = &self.inner;
        let previous = inner.current_config();
        let descriptors = Arc::new(config.descriptors());

        if let Some(monitor) = inner.monitor.get() {
            for root in previous.local_repository_roots() {
                monitor.deregister_root(root);
            }
            monitor.deregister_root(previous.cache_root.join(previous.runtime_version.as_str()));

            let cache_dir = config.cache_root.join(config.runtime_version.as_str());
            tokio::fs::create_dir_all(&cache_dir).await?;
            monitor.register_root(cache_dir, RootKind::CacheDir);
            for root in config.local_repository_roots() {
                monitor.register_root(root, RootKind::LocalRepo);
            }
        }

        if let Ok(mut slot) = inner.config.write() {
            *slot = Arc::new(config);
        }
        if let Ok(mut slot) = inner.descriptors.write() {
            *slot = descriptors;
        }

        inner.store.clear_lifecycle();
        inner.actualize_tracked(true);
        inner.debouncer.schedule();
        Ok(())
    }

    /// Tears down all descendant work: jobs, background tasks, the
    /// debouncer waiter, and the filesystem monitor.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.jobs.cancel_all().await;
        inner.debouncer.shutdown();
        let tasks: Vec<JoinHandle<()>> = inner
            .tasks
            .lock()
            .map(|mut t| t.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            task.abort();
        }
        if let Some(monitor) = inner.monitor.get() {
            monitor.shutdown().await;
        }
    }
}

impl VaultInner {
    fn current_config(&self) -> Arc<VaultConfig> {
        self.config
            .read()
            .map(|c| Arc::clone(&c))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    fn current_descriptors(&self) -> Arc<Vec<BundleDescriptor>> {
        self.descriptors
            .read()
            .map(|d| Arc::clone(&d))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    fn push_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    fn descriptor_for_coordinate(
        &self,
        coordinate: &ArtifactCoordinate,
    ) -> Option<BundleDescriptor> {
        self.current_descriptors()
            .iter()
            .find(|d| d.enabled && d.coordinates.contains(coordinate))
            .cloned()
    }

    /// Maps a host-requested file name to `(coordinate, requested
    /// version)`, by naming-override detection where configured, by
    /// `<artifactId>-<version>.jar` segmentation otherwise.
    fn detect_request(&self, file_name: &str) -> Option<(ArtifactCoordinate, RequestedVersion)> {
        for descriptor in self.current_descriptors().iter() {
            if !descriptor.enabled || self.store.is_disabled(&descriptor.name) {
                continue;
            }
            for coordinate in &descriptor.coordinates {
                if let Some(naming) = &descriptor.naming {
                    if let Ok(compiled) = self.naming.get(naming, coordinate)
                        && let Some(detected) = compiled.detect(file_name)
                        && let Some(lib) = detected.lib
                    {
                        return Some((coordinate.clone(), lib));
                    }
                } else if let Some(version) = file_name
                    .strip_prefix(&format!("{}-", coordinate.artifact_id))
                    .and_then(|rest| rest.strip_suffix(".jar"))
                    && !version.is_empty()
                {
                    return Some((coordinate.clone(), RequestedVersion::from(version)));
                }
            }
        }
        None
    }

    fn spawn_resolution(
        self: &Arc<Self>,
        descriptor: BundleDescriptor,
        requested: RequestedVersion,
    ) -> bool {
        let key: BundleKey = (descriptor.name.clone(), requested.clone());
        let job_inner = Arc::clone(self);
        self.jobs.spawn(key, async move {
            job_inner.resolve_once(&descriptor, &requested).await;
        })
    }

    async fn resolve_once(self: &Arc<Self>, descriptor: &BundleDescriptor, requested: &RequestedVersion) {
        let key: BundleKey = (descriptor.name.clone(), requested.clone());
        self.hooks
            .status_changed(&descriptor.name, requested, BundleStatus::InProgress);

        let config = self.current_config();
        let runtime = config.runtime_version.clone();
        let bundle_dir = layout::cache_bundle_dir(
            &config.cache_root,
            &runtime,
            &descriptor.name,
            requested,
        );

        // Rescan first. A complete, checksum-consistent bundle on disk is
        // served as-is: after a restart the cache must work with every
        // repository unreachable. A bundle that is already complete in
        // memory is being re-actualized, not restored, and must go through
        // the resolver so upstream changes are seen.
        let rescanned = rescan_bundle_dir(&bundle_dir, descriptor, &runtime);
        if self.store.complete_bundle(descriptor, requested).is_none()
            && verified_rescan(&rescanned, descriptor)
        {
            tracing::info!(
                bundle = descriptor.name,
                requested = %requested,
                "serving rescanned bundle from disk"
            );
            for (coordinate, cached) in &rescanned {
                let id = JarId {
                    bundle: descriptor.name.clone(),
                    coordinate: coordinate.clone(),
                    requested: requested.clone(),
                };
                self.publish_if_new(&id, cached).await;
                self.store.set(id, ArtifactState::Cached(cached.clone()));
            }
            self.store.reset_retries(&key);
            self.hooks
                .status_changed(&descriptor.name, requested, BundleStatus::Success);
            self.store.clear_lifecycle();
            self.debouncer.schedule();
            return;
        }

        // Anything less than a complete bundle still feeds the resolver as
        // its disk-cache reuse candidates.
        let mut known = self.store.known_cached(descriptor, requested);
        for (coordinate, artifact) in rescanned {
            known.entry(coordinate).or_insert(artifact);
        }

        let result = {
            let _suppress = self.monitor.get().map(FsMonitor::mark_self_update);
            self.resolver
                .resolve_bundle(descriptor, &runtime, requested, &bundle_dir, &known)
                .await
        };

        let fully_cached = result.is_fully_cached();
        let mut any_failed = false;
        for (coordinate, member) in &result.members {
            let id = JarId {
                bundle: descriptor.name.clone(),
                coordinate: coordinate.clone(),
                requested: requested.clone(),
            };
            let state = match member {
                LocatorResult::Cached(cached) => {
                    self.publish_if_new(&id, cached).await;
                    ArtifactState::Cached(cached.clone())
                }
                LocatorResult::FailedToFetch { message } => {
                    any_failed = true;
                    ArtifactState::FailedToFetch {
                        message: message.clone(),
                    }
                }
                LocatorResult::NotFound { message } => ArtifactState::NotFound {
                    message: message.clone(),
                },
                LocatorResult::PartiallyResolved => ArtifactState::PartiallyResolved,
            };
            self.store.set(id, state);
        }

        let status = if fully_cached {
            self.store.reset_retries(&key);
            BundleStatus::Success
        } else if any_failed {
            let attempts = self.store.record_retry(key.clone());
            let ceiling = config.settings.retry_ceiling;
            if attempts >= ceiling {
                tracing::info!(
                    bundle = descriptor.name,
                    requested = %requested,
                    attempts,
                    "retry ceiling reached, giving up for this cycle"
                );
            }
            BundleStatus::FailedToFetch
        } else {
            BundleStatus::NotFound
        };
        self.hooks.status_changed(&descriptor.name, requested, status);

        self.store.clear_lifecycle();
        self.debouncer.schedule();
    }

    /// Emits discovery and indexes the jar when the member is new or its
    /// file changed since the last resolution.
    async fn publish_if_new(&self, id: &JarId, cached: &CachedArtifact) {
        let unchanged = self
            .store
            .get(id)
            .as_ref()
            .and_then(ArtifactState::as_cached)
            .is_some_and(|prev| {
                prev.jar.path == cached.jar.path && prev.jar.checksum == cached.jar.checksum
            });
        if unchanged {
            return;
        }
        self.hooks.jar_discovered(id, &cached.jar);
        if let Err(e) = self
            .attributor
            .index_jar(id.clone(), cached.jar.path.clone())
            .await
        {
            tracing::warn!(id = %id, error = %e, "failed to index jar classes");
        }
    }

    fn actualize_tracked(self: &Arc<Self>, reset_retries: bool) {
        let descriptors = self.current_descriptors();
        let ceiling = self.current_config().settings.retry_ceiling;
        for key in self.store.tracked_keys() {
            let Some(descriptor) = descriptors.iter().find(|d| d.name == key.0) else {
                continue;
            };
            if !descriptor.enabled || self.store.is_disabled(&descriptor.name) {
                continue;
            }
            if reset_retries {
                self.store.reset_retries(&key);
            } else if !self.should_auto_retry(descriptor, &key, ceiling) {
                continue;
            }
            self.spawn_resolution(descriptor.clone(), key.1);
        }
    }

    /// Periodic actualization skips bundles that are definitively absent
    /// and bundles whose transient failures exhausted the retry ceiling.
    fn should_auto_retry(
        &self,
        descriptor: &BundleDescriptor,
        key: &BundleKey,
        ceiling: u32,
    ) -> bool {
        let states = self.store.member_states(descriptor, &key.1);
        let any_failed = states
            .iter()
            .flatten()
            .any(ArtifactState::is_failed);
        if any_failed && self.store.retry_count(key) >= ceiling {
            return false;
        }
        let all_not_found = !states.is_empty()
            && states
                .iter()
                .all(|s| matches!(s, Some(ArtifactState::NotFound { .. })));
        !all_not_found
    }

    fn status_of(&self, descriptor: &BundleDescriptor, key: &BundleKey) -> BundleStatus {
        if self.store.is_disabled(&descriptor.name) {
            return BundleStatus::Disabled;
        }
        if self.jobs.is_running(key) {
            return BundleStatus::InProgress;
        }
        if self.store.complete_bundle(descriptor, &key.1).is_some() {
            return BundleStatus::Success;
        }
        let states = self.store.member_states(descriptor, &key.1);
        if states.iter().any(|s| {
            matches!(
                s,
                Some(ArtifactState::FailedToFetch { .. } | ArtifactState::PartiallyResolved)
            )
        }) {
            BundleStatus::FailedToFetch
        } else if states.iter().any(Option::is_none) {
            BundleStatus::InProgress
        } else {
            BundleStatus::NotFound
        }
    }

    fn handle_change(self: &Arc<Self>, change: ChangeEvent) {
        match change {
            ChangeEvent::LocalRepoChanged { root } => {
                tracing::info!(root = %root.display(), "local repository changed, re-actualizing");
                self.actualize_tracked(true);
            }
            ChangeEvent::ExternalCacheChange { root } => {
                tracing::warn!(root = %root.display(), "external change under cache directory");
                self.store.clear_lifecycle();
                self.actualize_tracked(true);
                self.debouncer.schedule();
            }
        }
    }
}

/// Reads previously cached bundle members back from disk: jar file names
/// are parsed against the current runtime version, and the sibling checksum
/// and origin-repository records must both be present.
fn rescan_bundle_dir(
    bundle_dir: &Path,
    descriptor: &BundleDescriptor,
    runtime: &RuntimeVersion,
) -> HashMap<ArtifactCoordinate, CachedArtifact> {
    let mut found = HashMap::new();
    let Ok(entries) = std::fs::read_dir(bundle_dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((artifact_id, resolved, _classifier)) =
            layout::parse_cached_jar_name(name, runtime)
        else {
            continue;
        };
        let Some(coordinate) = descriptor
            .coordinates
            .iter()
            .find(|c| c.artifact_id == artifact_id)
        else {
            continue;
        };
        let Ok(checksum) = std::fs::read_to_string(layout::checksum_path(&path)) else {
            continue;
        };
        let Ok(origin) = std::fs::read_to_string(layout::repo_marker_path(&path)) else {
            continue;
        };
        let origin = origin.trim().to_string();
        if origin.is_empty() {
            continue;
        }
        let is_local = layout::origin_marker_path(&path).exists();
        found.insert(
            coordinate.clone(),
            CachedArtifact {
                jar: Jar {
                    path,
                    checksum: checksum.trim().to_string(),
                    is_local,
                    runtime_version_mismatch: false,
                },
                origin_repository: origin,
                resolved: resolved.clone(),
            },
        );
    }
    found
}

/// Whether a rescanned bundle can be served directly: every coordinate
/// present at one resolved version, every origin repository still
/// configured, and every file's current hash matching its recorded
/// checksum.
fn verified_rescan(
    rescanned: &HashMap<ArtifactCoordinate, CachedArtifact>,
    descriptor: &BundleDescriptor,
) -> bool {
    if rescanned.is_empty() || rescanned.len() != descriptor.coordinates.len() {
        return false;
    }
    let mut resolved: Option<&ResolvedVersion> = None;
    for cached in rescanned.values() {
        match resolved {
            None => resolved = Some(&cached.resolved),
            Some(v) if *v == cached.resolved => {}
            Some(_) => return false,
        }
        if !descriptor.has_repository(&cached.origin_repository) {
            return false;
        }
        match jarvault_core::sha256_file(&cached.jar.path) {
            Ok(actual) if actual == cached.jar.checksum => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BundleConfig, VaultSettings};
    use crate::events::{NullHooks, StackFrame};
    use jarvault_core::model::{MatchPolicy, Repository, RepositoryKind};
    use std::time::Duration;

    const METADATA: &str = "<metadata><versioning><versions>\
        <version>1.9.24-0.2.2-dev-1</version>\
        <version>1.9.20-0.2.2-dev-1</version>\
        </versions></versioning></metadata>";

    fn config(server_url: &str, cache_root: &Path) -> VaultConfig {
        VaultConfig {
            cache_root: cache_root.to_path_buf(),
            runtime_version: RuntimeVersion::from("1.9.24"),
            repositories: vec![Repository {
                name: "central".into(),
                location: server_url.into(),
                kind: RepositoryKind::Remote,
            }],
            bundles: vec![BundleConfig {
                name: "my-plugin".into(),
                coordinates: vec!["org.example:plugin-cli".parse().unwrap()],
                match_policy: MatchPolicy::Exact,
                repositories: vec!["central".into()],
                enabled: true,
                ignore_runtime_exceptions: false,
                naming: None,
            }],
            settings: VaultSettings {
                quiet_period_ms: 20,
                ..VaultSettings::default()
            },
        }
    }

    async fn mock_artifact(server: &mut mockito::Server) {
        let _ = server
            .mock("GET", "/org/example/plugin-cli/maven-metadata.xml")
            .with_status(200)
            .with_body(METADATA)
            .create_async()
            .await;
        let _ = server
            .mock(
                "GET",
                "/org/example/plugin-cli/1.9.24-0.2.2-dev-1/plugin-cli-1.9.24-0.2.2-dev-1-for-ide.jar",
            )
            .with_status(404)
            .create_async()
            .await;
        let _ = server
            .mock(
                "GET",
                "/org/example/plugin-cli/1.9.24-0.2.2-dev-1/plugin-cli-1.9.24-0.2.2-dev-1.jar",
            )
            .with_status(200)
            .with_body("jar bytes")
            .create_async()
            .await;
        let _ = server
            .mock("GET", mockito::Matcher::Regex(r".*\.sha256$".into()))
            .with_status(404)
            .create_async()
            .await;
    }

    async fn wait_for_path(
        vault: &BundleVault,
        coordinate: &ArtifactCoordinate,
        requested: &RequestedVersion,
    ) -> Option<PathBuf> {
        for _ in 0..100 {
            if let Some(path) = vault.get_artifact_path(coordinate, requested).await {
                return Some(path);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_miss_triggers_resolution_then_serves_cached_path() {
        let mut server = mockito::Server::new_async().await;
        mock_artifact(&mut server).await;
        let cache = tempfile::tempdir().unwrap();
        let vault = BundleVault::new(config(&server.url(), cache.path()), Arc::new(NullHooks));

        let coordinate: ArtifactCoordinate = "org.example:plugin-cli".parse().unwrap();
        let requested = RequestedVersion::from("0.2.2-dev-1");

        // First query misses and schedules the job.
        assert!(vault.get_artifact_path(&coordinate, &requested).await.is_none());
        let path = wait_for_path(&vault, &coordinate, &requested)
            .await
            .expect("bundle never became available");
        assert!(path.is_file());
        assert!(
            path.ends_with("1.9.24/my-plugin/0.2.2-dev-1/plugin-cli-1.9.24-0.2.2-dev-1.jar"),
            "unexpected layout: {}",
            path.display()
        );

        let statuses = vault.bundle_statuses();
        assert_eq!(
            statuses,
            vec![(
                "my-plugin".to_string(),
                requested.clone(),
                BundleStatus::Success
            )]
        );
        vault.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_artifact_by_path_segment() {
        let mut server = mockito::Server::new_async().await;
        mock_artifact(&mut server).await;
        let cache = tempfile::tempdir().unwrap();
        let vault = BundleVault::new(config(&server.url(), cache.path()), Arc::new(NullHooks));

        // Cold call schedules the job; poll until the substitute appears.
        let mut substitute = None;
        for _ in 0..100 {
            substitute = vault
                .request_artifact("/home/dev/.m2/plugin-cli-0.2.2-dev-1.jar")
                .await;
            if substitute.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(substitute.is_some_and(|p| p.is_file()));

        // A path no configured bundle owns maps to nothing.
        assert!(vault.request_artifact("/elsewhere/unrelated-1.0.jar").await.is_none());
        vault.shutdown().await;
    }

    #[tokio::test]
    async fn test_rescan_serves_warm_cache_without_network() {
        let cache = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        mock_artifact(&mut server).await;
        let coordinate: ArtifactCoordinate = "org.example:plugin-cli".parse().unwrap();
        let requested = RequestedVersion::from("0.2.2-dev-1");

        {
            let vault =
                BundleVault::new(config(&server.url(), cache.path()), Arc::new(NullHooks));
            wait_for_path(&vault, &coordinate, &requested).await.unwrap();
            vault.shutdown().await;
        }

        // Fresh engine over the same cache directory: the rescan picks the
        // file and its sibling records back up and the resolver validates
        // the checksum instead of downloading again.
        let vault = BundleVault::new(config(&server.url(), cache.path()), Arc::new(NullHooks));
        let path = wait_for_path(&vault, &coordinate, &requested)
            .await
            .expect("warm cache not served");
        assert!(path.is_file());
        vault.shutdown().await;
    }

    #[tokio::test]
    async fn test_warm_cache_served_with_repository_unreachable() {
        let cache = tempfile::tempdir().unwrap();
        let runtime = RuntimeVersion::from("1.9.24");
        let requested = RequestedVersion::from("0.2.2-dev-1");
        let coordinate: ArtifactCoordinate = "org.example:plugin-cli".parse().unwrap();

        // A previous run's cache: jar plus checksum and origin records.
        let bundle_dir =
            layout::cache_bundle_dir(cache.path(), &runtime, "my-plugin", &requested);
        std::fs::create_dir_all(&bundle_dir).unwrap();
        let jar = bundle_dir.join("plugin-cli-1.9.24-0.2.2-dev-1.jar");
        std::fs::write(&jar, b"jar bytes").unwrap();
        std::fs::write(
            layout::checksum_path(&jar),
            jarvault_core::sha256_bytes(b"jar bytes"),
        )
        .unwrap();
        std::fs::write(layout::repo_marker_path(&jar), "central").unwrap();

        // Nothing listens on this address; the bundle must come from disk.
        let vault = BundleVault::new(
            config("http://127.0.0.1:9", cache.path()),
            Arc::new(NullHooks),
        );
        let path = wait_for_path(&vault, &coordinate, &requested)
            .await
            .expect("warm cache not served while repository unreachable");
        assert_eq!(path, jar);
        vault.shutdown().await;
    }

    #[test]
    fn test_rescan_with_stale_checksum_is_not_trusted() {
        let cache = tempfile::tempdir().unwrap();
        let jar_path = cache.path().join("plugin-cli-1.9.24-0.2.2-dev-1.jar");
        std::fs::write(&jar_path, b"tampered bytes").unwrap();

        let descriptor = config("http://127.0.0.1:9", cache.path())
            .descriptors()
            .remove(0);
        let coordinate: ArtifactCoordinate = "org.example:plugin-cli".parse().unwrap();
        let rescanned = HashMap::from([(
            coordinate,
            CachedArtifact {
                jar: Jar {
                    path: jar_path.clone(),
                    checksum: jarvault_core::sha256_bytes(b"original bytes"),
                    is_local: false,
                    runtime_version_mismatch: false,
                },
                origin_repository: "central".into(),
                resolved: ResolvedVersion::from("0.2.2-dev-1"),
            },
        )]);
        assert!(!verified_rescan(&rescanned, &descriptor));

        // The same record verifies once the file matches again.
        std::fs::write(&jar_path, b"original bytes").unwrap();
        assert!(verified_rescan(&rescanned, &descriptor));
    }

    #[tokio::test]
    async fn test_clear_caches_recreates_cache_dir() {
        let cache = tempfile::tempdir().unwrap();
        let server = mockito::Server::new_async().await;
        let vault = BundleVault::new(config(&server.url(), cache.path()), Arc::new(NullHooks));
        vault.start().await.unwrap();

        let cache_dir = cache.path().join("1.9.24");
        assert!(cache_dir.is_dir());
        let stray = cache_dir.join("stray.jar");
        {
            let _guard = vault.inner.monitor.get().map(FsMonitor::mark_self_update);
            std::fs::write(&stray, "bytes").unwrap();
        }

        vault.clear_caches().await;
        assert!(cache_dir.is_dir(), "cache dir not recreated after clear");
        assert!(!stray.exists());
        vault.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_ceiling_stops_periodic_retries() {
        let cache = tempfile::tempdir().unwrap();
        let vault = BundleVault::new(
            config("http://127.0.0.1:9", cache.path()),
            Arc::new(NullHooks),
        );
        let descriptor = vault.inner.current_descriptors()[0].clone();
        let requested = RequestedVersion::from("0.2.2-dev-1");
        let key: BundleKey = (descriptor.name.clone(), requested.clone());
        let id = JarId {
            bundle: descriptor.name.clone(),
            coordinate: descriptor.coordinates[0].clone(),
            requested,
        };

        vault.inner.store.set(
            id.clone(),
            ArtifactState::FailedToFetch {
                message: "connection refused".into(),
            },
        );
        for _ in 0..3 {
            vault.inner.store.record_retry(key.clone());
        }
        assert!(!vault.inner.should_auto_retry(&descriptor, &key, 3));

        // A manual refresh resets the budget.
        vault.inner.store.reset_retries(&key);
        assert!(vault.inner.should_auto_retry(&descriptor, &key, 3));

        // A definitively absent bundle is not retried periodically at all.
        vault.inner.store.set(
            id,
            ArtifactState::NotFound {
                message: "no matching version".into(),
            },
        );
        assert!(!vault.inner.should_auto_retry(&descriptor, &key, 3));
        vault.shutdown().await;
    }

    #[tokio::test]
    async fn test_attributed_exception_disables_bundle_when_opted_in() {
        let cache = tempfile::tempdir().unwrap();
        let server = mockito::Server::new_async().await;
        let mut cfg = config(&server.url(), cache.path());
        cfg.settings.auto_disable_on_exception = true;
        let vault = BundleVault::new(cfg, Arc::new(NullHooks));

        let id = JarId {
            bundle: "my-plugin".into(),
            coordinate: "org.example:plugin-cli".parse().unwrap(),
            requested: RequestedVersion::from("0.2.2-dev-1"),
        };
        vault
            .inner
            .attributor
            .insert(id.clone(), HashSet::from(["org.example.cli.Analyzer".to_string()]));

        let matched = vault.report_exception(&ExceptionTrace::new(vec![StackFrame::new(
            "org.example.cli.Analyzer",
        )]));
        assert_eq!(matched, HashSet::from([id.clone()]));
        assert!(vault.inner.store.is_disabled("my-plugin"));

        // Disabled bundles serve nothing.
        assert!(
            vault
                .get_artifact_path(&id.coordinate, &id.requested)
                .await
                .is_none()
        );
        vault.shutdown().await;
    }

    #[tokio::test]
    async fn test_ignore_runtime_exceptions_keeps_bundle_enabled() {
        let cache = tempfile::tempdir().unwrap();
        let server = mockito::Server::new_async().await;
        let mut cfg = config(&server.url(), cache.path());
        cfg.settings.auto_disable_on_exception = true;
        cfg.bundles[0].ignore_runtime_exceptions = true;
        let vault = BundleVault::new(cfg, Arc::new(NullHooks));

        let id = JarId {
            bundle: "my-plugin".into(),
            coordinate: "org.example:plugin-cli".parse().unwrap(),
            requested: RequestedVersion::from("0.2.2-dev-1"),
        };
        vault
            .inner
            .attributor
            .insert(id, HashSet::from(["org.example.cli.Analyzer".to_string()]));

        let matched = vault.report_exception(&ExceptionTrace::new(vec![StackFrame::new(
            "org.example.cli.Analyzer",
        )]));
        assert_eq!(matched.len(), 1);
        assert!(!vault.inner.store.is_disabled("my-plugin"));
        vault.shutdown().await;
    }

    #[test]
    fn test_detect_request_standard_and_naming() {
        let cache = tempfile::tempdir().unwrap();
        let mut cfg = config("http://127.0.0.1:1", cache.path());
        cfg.bundles.push(BundleConfig {
            name: "dev-plugin".into(),
            coordinates: vec!["org.example:plugin-k2".parse().unwrap()],
            match_policy: MatchPolicy::Latest,
            repositories: vec![],
            enabled: true,
            ignore_runtime_exceptions: false,
            naming: Some(jarvault_core::model::NamingOverride {
                version_pattern: "<kotlin-version>-<lib-version>".into(),
                detect_pattern: "<artifact-id>_<kotlin-version>_<lib-version>.jar".into(),
                search_pattern: "<artifact-id>_<kotlin-version>_<lib-version>.jar".into(),
            }),
        });
        let vault = BundleVault::new(cfg, Arc::new(NullHooks));

        let (coordinate, requested) = vault
            .inner
            .detect_request("plugin-cli-0.2.2-dev-1.jar")
            .unwrap();
        assert_eq!(coordinate.artifact_id, "plugin-cli");
        assert_eq!(requested, RequestedVersion::from("0.2.2-dev-1"));

        let (coordinate, requested) = vault
            .inner
            .detect_request("plugin-k2_1.9.24_0.3.0.jar")
            .unwrap();
        assert_eq!(coordinate.artifact_id, "plugin-k2");
        assert_eq!(requested, RequestedVersion::from("0.3.0"));

        assert!(vault.inner.detect_request("unrelated.jar").is_none());
    }
}
