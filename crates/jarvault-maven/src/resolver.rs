//! Bundle resolution.
//!
//! A bundle is a set of co-versioned coordinates that must resolve
//! atomically: one version, one repository, for every member. Repositories
//! are tried in priority order (local before remote); the first repository
//! that yields a complete bundle wins, and anything freshly materialized
//! during an abandoned attempt is rolled back so the cache never holds a
//! mixed bundle.

use crate::layout::{self, IDE_CLASSIFIER};
use crate::local::{self, LocalRepository};
use crate::remote::RemoteRepository;
use futures::future::join_all;
use jarvault_core::checksum::sha256_file;
use jarvault_core::error::Result;
use jarvault_core::fetch::HttpFetcher;
use jarvault_core::model::{
    ArtifactCoordinate, BundleDescriptor, CachedArtifact, Jar, Repository, RequestedVersion,
    ResolvedVersion, RuntimeVersion,
};
use jarvault_core::naming::{CompiledNaming, NamingCompiler};
use jarvault_core::version::{self, VersionFilter};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolution outcome for one bundle member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorResult {
    Cached(CachedArtifact),
    FailedToFetch { message: String },
    NotFound { message: String },
    PartiallyResolved,
}

/// Per-coordinate results of one bundle resolution.
#[derive(Debug, Default)]
pub struct BundleResult {
    pub members: HashMap<ArtifactCoordinate, LocatorResult>,
}

impl BundleResult {
    pub fn is_fully_cached(&self) -> bool {
        !self.members.is_empty()
            && self
                .members
                .values()
                .all(|r| matches!(r, LocatorResult::Cached(_)))
    }

    /// The single resolved version of a fully cached bundle.
    pub fn resolved_version(&self) -> Option<&ResolvedVersion> {
        self.members.values().find_map(|r| match r {
            LocatorResult::Cached(c) => Some(&c.resolved),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    NotFound,
    Failed,
}

#[derive(Debug)]
struct MemberFailure {
    kind: FailureKind,
    message: String,
}

/// Removes a downloading temp file on every exit path, including task
/// cancellation, unless the download completed and the guard was disarmed.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

enum RepoClient {
    Remote(RemoteRepository),
    Local(LocalRepository),
}

impl RepoClient {
    fn new(repository: &Repository, fetcher: &Arc<HttpFetcher>) -> Self {
        if repository.is_local() {
            Self::Local(LocalRepository::new(repository))
        } else {
            Self::Remote(RemoteRepository::new(repository, Arc::clone(fetcher)))
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Remote(r) => &r.name,
            Self::Local(l) => &l.name,
        }
    }
}

enum Materialized {
    Done { artifact: CachedArtifact, fresh: bool },
    Absent(String),
}

/// Locates and materializes whole bundles.
pub struct BundleResolver {
    fetcher: Arc<HttpFetcher>,
    naming: NamingCompiler,
}

impl BundleResolver {
    pub fn new(fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            fetcher,
            naming: NamingCompiler::new(),
        }
    }

    /// Resolves every member of `descriptor` to one consistent version for
    /// `requested`, materializing files under `cache_dir`.
    ///
    /// `known` carries previously cached members for this
    /// `(bundle, requested)` key; a member whose file still exists with a
    /// matching checksum and an origin repository still configured on the
    /// descriptor is reused without a download.
    ///
    /// Failures are captured per member in the returned [`BundleResult`],
    /// never raised across this boundary.
    pub async fn resolve_bundle(
        &self,
        descriptor: &BundleDescriptor,
        runtime: &RuntimeVersion,
        requested: &RequestedVersion,
        cache_dir: &Path,
        known: &HashMap<ArtifactCoordinate, CachedArtifact>,
    ) -> BundleResult {
        let filter = VersionFilter {
            policy: descriptor.match_policy,
            requested: requested.clone(),
        };

        // Naming overrides are compiled once per resolution; a broken
        // template fails every member identically.
        let naming = match self.compile_naming(descriptor) {
            Ok(naming) => naming,
            Err(message) => {
                return self.all_members_failed(descriptor, message);
            }
        };

        let mut failures: HashMap<ArtifactCoordinate, Vec<MemberFailure>> = HashMap::new();
        let mut partial: HashSet<ArtifactCoordinate> = HashSet::new();

        for repository in descriptor.prioritized_repositories() {
            let client = RepoClient::new(repository, &self.fetcher);

            match self
                .try_repository(descriptor, &client, runtime, &filter, cache_dir, known, &naming)
                .await
            {
                RepoAttempt::Complete(artifacts) => {
                    tracing::info!(
                        bundle = descriptor.name,
                        repository = client.name(),
                        "bundle fully resolved"
                    );
                    return BundleResult {
                        members: artifacts
                            .into_iter()
                            .map(|(c, a)| (c, LocatorResult::Cached(a)))
                            .collect(),
                    };
                }
                RepoAttempt::Incomplete {
                    failures: attempt_failures,
                    reused,
                } => {
                    for (coordinate, failure) in attempt_failures {
                        failures.entry(coordinate).or_default().push(failure);
                    }
                    partial.extend(reused);
                }
            }
        }

        self.merge_failures(descriptor, failures, partial)
    }

    fn compile_naming(
        &self,
        descriptor: &BundleDescriptor,
    ) -> std::result::Result<HashMap<ArtifactCoordinate, Arc<CompiledNaming>>, String> {
        let mut compiled = HashMap::new();
        if let Some(naming) = &descriptor.naming {
            for coordinate in &descriptor.coordinates {
                match self.naming.get(naming, coordinate) {
                    Ok(c) => {
                        compiled.insert(coordinate.clone(), c);
                    }
                    Err(e) => return Err(format!("invalid naming override: {e}")),
                }
            }
        }
        Ok(compiled)
    }

    fn all_members_failed(&self, descriptor: &BundleDescriptor, message: String) -> BundleResult {
        BundleResult {
            members: descriptor
                .coordinates
                .iter()
                .map(|c| {
                    (
                        c.clone(),
                        LocatorResult::FailedToFetch {
                            message: message.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_repository(
        &self,
        descriptor: &BundleDescriptor,
        client: &RepoClient,
        runtime: &RuntimeVersion,
        filter: &VersionFilter,
        cache_dir: &Path,
        known: &HashMap<ArtifactCoordinate, CachedArtifact>,
        naming: &HashMap<ArtifactCoordinate, Arc<CompiledNaming>>,
    ) -> RepoAttempt {
        let repo_name = client.name();
        let mut attempt_failures: Vec<(ArtifactCoordinate, MemberFailure)> = Vec::new();

        // Step 1: every member must produce a version manifest before any
        // matching runs.
        let manifests = self
            .fetch_manifests(descriptor, client, runtime, naming)
            .await;

        let mut candidate_lists: Vec<Vec<String>> = Vec::with_capacity(manifests.len());
        let mut manifest_gap = false;
        for (coordinate, manifest) in &manifests {
            match manifest {
                Ok(Some(versions)) => candidate_lists.push(versions.clone()),
                Ok(None) => {
                    manifest_gap = true;
                    attempt_failures.push((
                        coordinate.clone(),
                        MemberFailure {
                            kind: FailureKind::NotFound,
                            message: format!("no version manifest for {coordinate} in {repo_name}"),
                        },
                    ));
                }
                Err(e) => {
                    manifest_gap = true;
                    attempt_failures.push((
                        coordinate.clone(),
                        MemberFailure {
                            kind: FailureKind::Failed,
                            message: format!(
                                "failed to fetch version manifest for {coordinate} from {repo_name}: {e}"
                            ),
                        },
                    ));
                }
            }
        }
        if manifest_gap {
            return RepoAttempt::Incomplete {
                failures: attempt_failures,
                reused: Vec::new(),
            };
        }

        // Step 2: one resolved version valid for the whole bundle.
        let Some(resolved) = version::select_bundle_version(&candidate_lists, runtime, filter)
        else {
            for ((coordinate, _), candidates) in manifests.iter().zip(&candidate_lists) {
                let available: Vec<&str> = candidates
                    .iter()
                    .filter_map(|c| version::strip_runtime_prefix(c, runtime))
                    .collect();
                attempt_failures.push((
                    coordinate.clone(),
                    MemberFailure {
                        kind: FailureKind::NotFound,
                        message: format!(
                            "no version matching {} ({:?}) for {coordinate} in {repo_name}; available: [{}]",
                            filter.requested,
                            filter.policy,
                            available.join(", ")
                        ),
                    },
                ));
            }
            return RepoAttempt::Incomplete {
                failures: attempt_failures,
                reused: Vec::new(),
            };
        };

        // Step 3: materialize every member from this repository. The first
        // failure abandons the attempt; fresh files are rolled back so
        // results from different repositories are never mixed.
        let mut done: Vec<(ArtifactCoordinate, CachedArtifact, bool)> = Vec::new();
        for coordinate in &descriptor.coordinates {
            let outcome = self
                .materialize(
                    descriptor,
                    client,
                    coordinate,
                    runtime,
                    &resolved,
                    cache_dir,
                    known.get(coordinate),
                    naming.get(coordinate).map(Arc::as_ref),
                )
                .await;

            let failure = match outcome {
                Ok(Materialized::Done { artifact, fresh }) => {
                    done.push((coordinate.clone(), artifact, fresh));
                    continue;
                }
                Ok(Materialized::Absent(message)) => MemberFailure {
                    kind: FailureKind::NotFound,
                    message,
                },
                Err(e) => MemberFailure {
                    kind: FailureKind::Failed,
                    message: format!("failed to fetch {coordinate} from {repo_name}: {e}"),
                },
            };
            attempt_failures.push((coordinate.clone(), failure));

            let mut reused = Vec::new();
            for (done_coordinate, artifact, fresh) in done {
                if fresh {
                    remove_cached_files(&artifact.jar.path);
                } else {
                    // A pre-existing cache hit stays on disk but the bundle
                    // is incomplete, so it must never be served.
                    reused.push(done_coordinate);
                }
            }
            return RepoAttempt::Incomplete {
                failures: attempt_failures,
                reused,
            };
        }

        RepoAttempt::Complete(done.into_iter().map(|(c, a, _)| (c, a)).collect())
    }

    async fn fetch_manifests(
        &self,
        descriptor: &BundleDescriptor,
        client: &RepoClient,
        runtime: &RuntimeVersion,
        naming: &HashMap<ArtifactCoordinate, Arc<CompiledNaming>>,
    ) -> Vec<(ArtifactCoordinate, Result<Option<Vec<String>>>)> {
        match client {
            RepoClient::Remote(remote) => {
                let fetches = descriptor.coordinates.iter().map(|coordinate| async move {
                    (coordinate.clone(), remote.fetch_versions(coordinate).await)
                });
                join_all(fetches).await
            }
            RepoClient::Local(local_repo) => descriptor
                .coordinates
                .iter()
                .map(|coordinate| {
                    let manifest = match naming.get(coordinate) {
                        Some(compiled) => {
                            local_repo.list_versions_with_naming(compiled, runtime)
                        }
                        None => local_repo.list_versions(coordinate),
                    };
                    (coordinate.clone(), manifest)
                })
                .collect(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn materialize(
        &self,
        descriptor: &BundleDescriptor,
        client: &RepoClient,
        coordinate: &ArtifactCoordinate,
        runtime: &RuntimeVersion,
        resolved: &ResolvedVersion,
        cache_dir: &Path,
        known: Option<&CachedArtifact>,
        naming: Option<&CompiledNaming>,
    ) -> Result<Materialized> {
        tokio::fs::create_dir_all(cache_dir).await?;
        let full = layout::full_version(runtime, resolved);

        // Disk cache hit: same path, still-valid checksum, origin
        // repository still configured.
        for classifier in [Some(IDE_CLASSIFIER), None] {
            let target = cache_dir.join(layout::cached_jar_name(
                coordinate, runtime, resolved, classifier,
            ));
            if let Some(hit) = self
                .check_disk_hit(descriptor, client, coordinate, &full, classifier, &target, known)
                .await?
            {
                tracing::debug!(path = %target.display(), "checksum-validated cache hit");
                return Ok(Materialized::Done {
                    artifact: hit,
                    fresh: false,
                });
            }
        }

        match client {
            RepoClient::Remote(remote) => {
                self.materialize_remote(remote, coordinate, runtime, resolved, &full, cache_dir)
                    .await
            }
            RepoClient::Local(local_repo) => {
                self.materialize_local(
                    local_repo, coordinate, runtime, resolved, &full, cache_dir, naming,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn check_disk_hit(
        &self,
        descriptor: &BundleDescriptor,
        client: &RepoClient,
        coordinate: &ArtifactCoordinate,
        full_version: &str,
        classifier: Option<&str>,
        target: &Path,
        known: Option<&CachedArtifact>,
    ) -> Result<Option<CachedArtifact>> {
        let Some(known) = known else { return Ok(None) };
        if known.jar.path != target
            || !target.is_file()
            || !descriptor.has_repository(&known.origin_repository)
        {
            return Ok(None);
        }

        // Validate against the sibling checksum resource where the
        // repository publishes one; otherwise re-hash the cached file.
        let upstream = match client {
            RepoClient::Remote(remote) => {
                remote
                    .fetch_checksum(coordinate, full_version, classifier)
                    .await?
            }
            RepoClient::Local(local_repo) => {
                match local_repo.locate(coordinate, full_version, classifier) {
                    Some(source) => Some(sha256_file(&source)?),
                    None => None,
                }
            }
        };
        let current = match upstream {
            Some(checksum) => checksum,
            None => sha256_file(target)?,
        };

        if current != known.jar.checksum {
            return Ok(None);
        }
        // The hit now belongs to the repository that validated it; restamp
        // the record and the sibling marker so the whole bundle reports one
        // origin.
        let mut hit = known.clone();
        let repo_name = client.name();
        if hit.origin_repository != repo_name {
            hit.origin_repository = repo_name.to_string();
            std::fs::write(layout::repo_marker_path(target), &hit.origin_repository)?;
        }
        Ok(Some(hit))
    }

    async fn materialize_remote(
        &self,
        remote: &RemoteRepository,
        coordinate: &ArtifactCoordinate,
        runtime: &RuntimeVersion,
        resolved: &ResolvedVersion,
        full_version: &str,
        cache_dir: &Path,
    ) -> Result<Materialized> {
        // The for-IDE classified artifact takes precedence over the plain
        // name.
        for classifier in [Some(IDE_CLASSIFIER), None] {
            let target = cache_dir.join(layout::cached_jar_name(
                coordinate, runtime, resolved, classifier,
            ));
            let part = layout::part_path(&target);
            let mut guard = TempGuard::new(part.clone());

            match remote
                .download_artifact(coordinate, full_version, classifier, &part)
                .await?
            {
                Some(_) => {
                    tokio::fs::rename(&part, &target).await?;
                    guard.disarm();

                    let actual = sha256_file(&target)?;
                    if let Some(expected) = remote
                        .fetch_checksum(coordinate, full_version, classifier)
                        .await?
                        && expected != actual
                    {
                        let _ = std::fs::remove_file(&target);
                        return Err(jarvault_core::BundleError::ChecksumMismatch {
                            path: target,
                            expected,
                            actual,
                        });
                    }

                    write_cache_siblings(&target, &actual, &remote.name)?;
                    return Ok(Materialized::Done {
                        artifact: CachedArtifact {
                            jar: Jar {
                                path: target,
                                checksum: actual,
                                is_local: false,
                                runtime_version_mismatch: false,
                            },
                            origin_repository: remote.name.clone(),
                            resolved: resolved.clone(),
                        },
                        fresh: true,
                    });
                }
                None => continue,
            }
        }
        Ok(Materialized::Absent(format!(
            "artifact {coordinate} {full_version} not found in {}",
            remote.name
        )))
    }

    #[allow(clippy::too_many_arguments)]
    async fn materialize_local(
        &self,
        local_repo: &LocalRepository,
        coordinate: &ArtifactCoordinate,
        runtime: &RuntimeVersion,
        resolved: &ResolvedVersion,
        full_version: &str,
        cache_dir: &Path,
        naming: Option<&CompiledNaming>,
    ) -> Result<Materialized> {
        let mut found: Option<(PathBuf, Option<&str>)> = None;
        for classifier in [Some(IDE_CLASSIFIER), None] {
            if let Some(source) = local_repo.locate(coordinate, full_version, classifier) {
                found = Some((source, classifier));
                break;
            }
        }
        if found.is_none()
            && let Some(compiled) = naming
            && let Some(source) = local_repo.locate_with_naming(compiled, runtime, resolved.as_str())
        {
            found = Some((source, None));
        }

        let Some((source, classifier)) = found else {
            return Ok(Materialized::Absent(format!(
                "artifact {coordinate} {full_version} not found in {}",
                local_repo.name
            )));
        };

        let target = cache_dir.join(layout::cached_jar_name(
            coordinate, runtime, resolved, classifier,
        ));
        let part = layout::part_path(&target);
        let mut guard = TempGuard::new(part.clone());
        tokio::fs::copy(&source, &part).await?;
        tokio::fs::rename(&part, &target).await?;
        guard.disarm();

        let checksum = sha256_file(&target)?;
        write_cache_siblings(&target, &checksum, &local_repo.name)?;
        local::write_origin_marker(&layout::origin_marker_path(&target), &source)?;

        // A republished build output can embed a different runtime version
        // than the host's; surface that rather than refusing the file.
        let runtime_version_mismatch = naming
            .and_then(|compiled| {
                let name = source.file_name()?.to_str()?;
                compiled.detect(name)
            })
            .and_then(|detected| detected.runtime)
            .is_some_and(|detected_runtime| &detected_runtime != runtime);

        Ok(Materialized::Done {
            artifact: CachedArtifact {
                jar: Jar {
                    path: target,
                    checksum,
                    is_local: true,
                    runtime_version_mismatch,
                },
                origin_repository: local_repo.name.clone(),
                resolved: resolved.clone(),
            },
            fresh: true,
        })
    }

    fn merge_failures(
        &self,
        descriptor: &BundleDescriptor,
        mut failures: HashMap<ArtifactCoordinate, Vec<MemberFailure>>,
        partial: HashSet<ArtifactCoordinate>,
    ) -> BundleResult {
        let members = descriptor
            .coordinates
            .iter()
            .map(|coordinate| {
                let collected = failures.remove(coordinate).unwrap_or_default();
                let result = if collected.is_empty() {
                    if partial.contains(coordinate) {
                        LocatorResult::PartiallyResolved
                    } else {
                        LocatorResult::NotFound {
                            message: format!(
                                "no repository provided a complete bundle for {}",
                                descriptor.name
                            ),
                        }
                    }
                } else {
                    // Merge multiple repositories' messages into one; a
                    // single transient failure makes the whole member
                    // retryable.
                    let message = collected
                        .iter()
                        .map(|f| f.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; ");
                    if collected.iter().any(|f| f.kind == FailureKind::Failed) {
                        LocatorResult::FailedToFetch { message }
                    } else {
                        LocatorResult::NotFound { message }
                    }
                };
                (coordinate.clone(), result)
            })
            .collect();
        BundleResult { members }
    }
}

enum RepoAttempt {
    Complete(HashMap<ArtifactCoordinate, CachedArtifact>),
    Incomplete {
        failures: Vec<(ArtifactCoordinate, MemberFailure)>,
        /// Members whose pre-existing cached file survived the abandoned
        /// attempt; reported as `PartiallyResolved`.
        reused: Vec<ArtifactCoordinate>,
    },
}

fn write_cache_siblings(jar: &Path, checksum: &str, origin_repository: &str) -> Result<()> {
    std::fs::write(layout::checksum_path(jar), checksum)?;
    std::fs::write(layout::repo_marker_path(jar), origin_repository)?;
    Ok(())
}

/// Deletes a cached jar and all of its sibling marker files.
pub fn remove_cached_files(jar: &Path) {
    let _ = std::fs::remove_file(jar);
    let _ = std::fs::remove_file(layout::checksum_path(jar));
    let _ = std::fs::remove_file(layout::origin_marker_path(jar));
    let _ = std::fs::remove_file(layout::repo_marker_path(jar));
}
