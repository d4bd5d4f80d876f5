//! Data model for plugin bundle resolution.
//!
//! The central identity type is [`JarId`]: it deliberately excludes the
//! *resolved* version so that a later re-resolution to a different concrete
//! version updates the same cache slot instead of creating a duplicate.

use crate::error::BundleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where a repository lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Remote,
    Local,
}

/// A configured artifact repository.
///
/// `name` is the unique key; `location` is a URL for remote repositories
/// and a filesystem path for local ones. Local repositories are preferred
/// over remote ones when both are configured for the same bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub location: String,
    pub kind: RepositoryKind,
}

impl Repository {
    pub fn is_local(&self) -> bool {
        self.kind == RepositoryKind::Local
    }
}

/// A `group:artifact` pair. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactCoordinate {
    pub group_id: String,
    pub artifact_id: String,
}

impl ArtifactCoordinate {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }
}

impl FromStr for ArtifactCoordinate {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((group, artifact)) if !group.is_empty() && !artifact.is_empty() => Ok(Self {
                group_id: group.to_string(),
                artifact_id: artifact.to_string(),
            }),
            _ => Err(BundleError::InvalidCoordinate(s.to_string())),
        }
    }
}

impl TryFrom<String> for ArtifactCoordinate {
    type Error = BundleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ArtifactCoordinate> for String {
    fn from(c: ArtifactCoordinate) -> Self {
        c.to_string()
    }
}

impl fmt::Display for ArtifactCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

/// How a requested version is matched against available candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Only an exact match to the requested version is acceptable.
    Exact,
    /// The newest candidate sharing the requested version's first
    /// dot-delimited segment.
    SameMajor,
    /// The newest candidate, ignoring the requested version.
    Latest,
}

/// Macro-templated naming patterns for non-standard local build layouts.
///
/// Used when artifacts are consumed directly from a build output directory
/// rather than a standard repository path. Templates may contain the
/// `<kotlin-version>`, `<lib-version>` and `<artifact-id>` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingOverride {
    /// How a full version string is composed, e.g.
    /// `<kotlin-version>-<lib-version>`.
    pub version_pattern: String,
    /// How to recognize an artifact file name and extract the embedded
    /// version components.
    pub detect_pattern: String,
    /// How to locate the canonical artifact file for a given coordinate.
    pub search_pattern: String,
}

/// A set of co-versioned artifact coordinates resolved as one unit.
///
/// All coordinates of a bundle must resolve to the *same* version from the
/// *same* repository; the resolver enforces this, not the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDescriptor {
    pub name: String,
    pub coordinates: Vec<ArtifactCoordinate>,
    pub match_policy: MatchPolicy,
    /// Ordered by priority; local repositories are consulted before remote
    /// ones regardless of configured order.
    pub repositories: Vec<Repository>,
    pub enabled: bool,
    pub ignore_runtime_exceptions: bool,
    pub naming: Option<NamingOverride>,
}

impl BundleDescriptor {
    /// Repositories in resolution priority order: local first, preserving
    /// the configured order within each kind.
    pub fn prioritized_repositories(&self) -> Vec<&Repository> {
        let mut repos: Vec<&Repository> = self.repositories.iter().filter(|r| r.is_local()).collect();
        repos.extend(self.repositories.iter().filter(|r| !r.is_local()));
        repos
    }

    pub fn has_repository(&self, name: &str) -> bool {
        self.repositories.iter().any(|r| r.name == name)
    }
}

macro_rules! version_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(v: impl Into<String>) -> Self {
                Self(v.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(v: &str) -> Self {
                Self(v.to_string())
            }
        }
    };
}

version_newtype! {
    /// The host's own internal compiler/platform version, used as a
    /// mandatory prefix when searching for compatible artifacts.
    RuntimeVersion
}

version_newtype! {
    /// The library version the calling host believes it needs.
    ///
    /// Distinct from [`ResolvedVersion`] on purpose: cache keys track the
    /// requested version, never the resolved one.
    RequestedVersion
}

version_newtype! {
    /// The library version actually selected by the matching policy and
    /// materialized on disk.
    ResolvedVersion
}

/// Identity of a loaded artifact.
///
/// Equality excludes the resolved version: two resolutions of the same
/// `(bundle, coordinate, requested)` triple occupy one cache slot even when
/// the matching policy picked different concrete versions over time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JarId {
    pub bundle: String,
    pub coordinate: ArtifactCoordinate,
    pub requested: RequestedVersion,
}

impl fmt::Display for JarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.bundle, self.coordinate, self.requested)
    }
}

/// A materialized artifact file, owned exclusively by the
/// [`ArtifactState`] that references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jar {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents.
    pub checksum: String,
    /// True when the file was sourced from a local repository.
    pub is_local: bool,
    /// True when a locally sourced file embeds a different runtime version
    /// than the host's.
    pub runtime_version_mismatch: bool,
}

/// A successfully cached bundle member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub jar: Jar,
    /// Name of the repository the file came from.
    pub origin_repository: String,
    pub resolved: ResolvedVersion,
}

/// Resolution outcome for one bundle member.
///
/// Transitions: absent -> `Cached` | `FailedToFetch` | `NotFound` on first
/// resolution; `Cached` -> `Cached` (checksum changes) on re-actualization;
/// any state -> absent on cache clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactState {
    Cached(CachedArtifact),
    /// Transient failure, eligible for retry on the next actualization.
    FailedToFetch { message: String },
    /// Definitively absent; not retried until configuration or upstream
    /// content changes.
    NotFound { message: String },
    /// Some bundle members cached, others not. Never served to the host.
    PartiallyResolved,
}

impl ArtifactState {
    pub fn as_cached(&self) -> Option<&CachedArtifact> {
        match self {
            Self::Cached(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::FailedToFetch { .. })
    }
}

/// Per-(bundle, requested version) status reported to the host for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    InProgress,
    Success,
    FailedToFetch,
    NotFound,
    ExceptionInRuntime,
    Disabled,
}
