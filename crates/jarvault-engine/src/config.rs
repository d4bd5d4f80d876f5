//! Engine configuration.
//!
//! The host supplies one [`VaultConfig`] record (hot-swappable); bundle
//! entries reference repositories by name and are materialized into
//! self-contained [`BundleDescriptor`]s before resolution.

use jarvault_core::model::{
    ArtifactCoordinate, BundleDescriptor, MatchPolicy, NamingOverride, Repository, RuntimeVersion,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_quiet_period_ms() -> u64 {
    750
}

fn default_extended_quiet_period_ms() -> u64 {
    2000
}

fn default_retry_ceiling() -> u32 {
    3
}

fn default_match_policy() -> MatchPolicy {
    MatchPolicy::Exact
}

fn default_true() -> bool {
    true
}

/// Tunables with serde-backed defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Quiet period before the host invalidation signal fires.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    /// Quiet period used when `extended_quiet_period` is set.
    #[serde(default = "default_extended_quiet_period_ms")]
    pub extended_quiet_period_ms: u64,
    #[serde(default)]
    pub extended_quiet_period: bool,
    /// Transient-failure resolutions are retried at most this many times
    /// per actualization cycle.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    /// Interval for periodic re-actualization; `None` disables it.
    #[serde(default)]
    pub auto_actualization_interval_secs: Option<u64>,
    /// Automatically disable a bundle once a runtime exception is
    /// attributed to it.
    #[serde(default)]
    pub auto_disable_on_exception: bool,
    /// Walk an exception's cause chain during attribution.
    #[serde(default = "default_true")]
    pub follow_exception_causes: bool,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
            extended_quiet_period_ms: default_extended_quiet_period_ms(),
            extended_quiet_period: false,
            retry_ceiling: default_retry_ceiling(),
            auto_actualization_interval_secs: None,
            auto_disable_on_exception: false,
            follow_exception_causes: true,
        }
    }
}

impl VaultSettings {
    /// The effective invalidation quiet period.
    pub fn quiet_period(&self) -> Duration {
        let ms = if self.extended_quiet_period {
            self.extended_quiet_period_ms
        } else {
            self.quiet_period_ms
        };
        Duration::from_millis(ms)
    }

    pub fn auto_actualization_interval(&self) -> Option<Duration> {
        self.auto_actualization_interval_secs
            .map(Duration::from_secs)
    }
}

/// One configured bundle, referencing repositories by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleConfig {
    pub name: String,
    pub coordinates: Vec<ArtifactCoordinate>,
    #[serde(default = "default_match_policy")]
    pub match_policy: MatchPolicy,
    /// Names of entries in [`VaultConfig::repositories`], in priority
    /// order.
    pub repositories: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub ignore_runtime_exceptions: bool,
    #[serde(default)]
    pub naming: Option<NamingOverride>,
}

/// Full engine configuration as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub cache_root: PathBuf,
    pub runtime_version: RuntimeVersion,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub bundles: Vec<BundleConfig>,
    #[serde(default)]
    pub settings: VaultSettings,
}

impl VaultConfig {
    pub fn from_json(json: &str) -> jarvault_core::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Materializes bundle entries into self-contained descriptors.
    ///
    /// A repository name with no matching entry is dropped with a warning;
    /// the bundle itself stays configured (and will resolve as not found if
    /// no repository remains).
    pub fn descriptors(&self) -> Vec<BundleDescriptor> {
        self.bundles
            .iter()
            .map(|bundle| {
                let repositories = bundle
                    .repositories
                    .iter()
                    .filter_map(|name| {
                        let found = self.repositories.iter().find(|r| &r.name == name);
                        if found.is_none() {
                            tracing::warn!(
                                bundle = bundle.name,
                                repository = name.as_str(),
                                "bundle references an unknown repository"
                            );
                        }
                        found.cloned()
                    })
                    .collect();
                BundleDescriptor {
                    name: bundle.name.clone(),
                    coordinates: bundle.coordinates.clone(),
                    match_policy: bundle.match_policy,
                    repositories,
                    enabled: bundle.enabled,
                    ignore_runtime_exceptions: bundle.ignore_runtime_exceptions,
                    naming: bundle.naming.clone(),
                }
            })
            .collect()
    }

    /// Local repository roots referenced by at least one enabled bundle;
    /// these form the hot-reload watch set.
    pub fn local_repository_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        for descriptor in self.descriptors() {
            if !descriptor.enabled {
                continue;
            }
            for repository in &descriptor.repositories {
                if repository.is_local() {
                    let root = PathBuf::from(&repository.location);
                    if !roots.contains(&root) {
                        roots.push(root);
                    }
                }
            }
        }
        roots
    }
}
