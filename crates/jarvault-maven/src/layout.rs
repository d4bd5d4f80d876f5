//! Repository and cache path layout.
//!
//! Remote repositories follow the standard Maven tree:
//! `<base>/<group/as/path>/<artifact>/maven-metadata.xml` and
//! `<base>/<group/as/path>/<artifact>/<version>/<artifact>-<version>[-classifier].jar`.
//!
//! The local cache tree is
//! `<cacheRoot>/<runtimeVersion>/<bundleName>/<requestedVersion>/
//! <artifactId>-<runtimeVersion>-<resolvedVersion>[-classifier].jar`, with a
//! sibling `.sha256` checksum file, a `.repo` file naming the origin
//! repository, and (for local-repository-sourced files) a `.origin`
//! link/marker pointing at the true source path.

use jarvault_core::model::{
    ArtifactCoordinate, RequestedVersion, ResolvedVersion, RuntimeVersion,
};
use std::path::{Path, PathBuf};

/// Secondary classifier tried before the plain artifact name.
pub const IDE_CLASSIFIER: &str = "for-ide";

pub const METADATA_FILE: &str = "maven-metadata.xml";

/// Suffix of in-flight download files, removed on every exit path.
pub const PART_SUFFIX: &str = "part";

pub const CHECKSUM_SUFFIX: &str = "sha256";
pub const ORIGIN_SUFFIX: &str = "origin";
pub const REPO_SUFFIX: &str = "repo";

/// `org.example.plugins` -> `org/example/plugins`.
pub fn group_path(coordinate: &ArtifactCoordinate) -> String {
    coordinate.group_id.replace('.', "/")
}

pub fn metadata_url(base: &str, coordinate: &ArtifactCoordinate) -> String {
    format!(
        "{}/{}/{}/{METADATA_FILE}",
        base.trim_end_matches('/'),
        group_path(coordinate),
        coordinate.artifact_id
    )
}

/// Full version string as embedded in artifact file names.
pub fn full_version(runtime: &RuntimeVersion, resolved: &ResolvedVersion) -> String {
    format!("{runtime}-{resolved}")
}

/// `<artifact>-<full_version>[-classifier].jar`
pub fn artifact_file_name(
    coordinate: &ArtifactCoordinate,
    full_version: &str,
    classifier: Option<&str>,
) -> String {
    match classifier {
        Some(c) => format!("{}-{full_version}-{c}.jar", coordinate.artifact_id),
        None => format!("{}-{full_version}.jar", coordinate.artifact_id),
    }
}

pub fn artifact_url(
    base: &str,
    coordinate: &ArtifactCoordinate,
    full_version: &str,
    classifier: Option<&str>,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        base.trim_end_matches('/'),
        group_path(coordinate),
        coordinate.artifact_id,
        full_version,
        artifact_file_name(coordinate, full_version, classifier)
    )
}

/// Directory holding one bundle's cached artifacts for one requested
/// version.
pub fn cache_bundle_dir(
    cache_root: &Path,
    runtime: &RuntimeVersion,
    bundle: &str,
    requested: &RequestedVersion,
) -> PathBuf {
    cache_root
        .join(runtime.as_str())
        .join(bundle)
        .join(requested.as_str())
}

/// Cached jar file name: `<artifactId>-<runtime>-<resolved>[-classifier].jar`.
pub fn cached_jar_name(
    coordinate: &ArtifactCoordinate,
    runtime: &RuntimeVersion,
    resolved: &ResolvedVersion,
    classifier: Option<&str>,
) -> String {
    artifact_file_name(coordinate, &full_version(runtime, resolved), classifier)
}

fn sibling(jar: &Path, suffix: &str) -> PathBuf {
    let mut name = jar.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

pub fn checksum_path(jar: &Path) -> PathBuf {
    sibling(jar, CHECKSUM_SUFFIX)
}

pub fn origin_marker_path(jar: &Path) -> PathBuf {
    sibling(jar, ORIGIN_SUFFIX)
}

pub fn repo_marker_path(jar: &Path) -> PathBuf {
    sibling(jar, REPO_SUFFIX)
}

pub fn part_path(jar: &Path) -> PathBuf {
    sibling(jar, PART_SUFFIX)
}

/// Parses a cached jar file name back into its artifact id, resolved
/// version and classifier. Inverse of [`cached_jar_name`]; used by the disk
/// rescan after a restart.
pub fn parse_cached_jar_name(
    name: &str,
    runtime: &RuntimeVersion,
) -> Option<(String, ResolvedVersion, Option<String>)> {
    let stem = name.strip_suffix(".jar")?;
    let marker = format!("-{}-", runtime.as_str());
    let idx = stem.find(&marker)?;
    let artifact_id = &stem[..idx];
    let rest = &stem[idx + marker.len()..];
    if artifact_id.is_empty() || rest.is_empty() {
        return None;
    }
    let (resolved, classifier) = match rest.strip_suffix(&format!("-{IDE_CLASSIFIER}")) {
        Some(v) => (v, Some(IDE_CLASSIFIER.to_string())),
        None => (rest, None),
    };
    Some((
        artifact_id.to_string(),
        ResolvedVersion::new(resolved),
        classifier,
    ))
}
