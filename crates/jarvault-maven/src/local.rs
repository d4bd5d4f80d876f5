//! Local repository client.
//!
//! Local repositories come in two shapes: a standard Maven tree (version
//! manifest = directory listing), and a naming-override layout where
//! artifacts sit in a build output directory and versions are embedded in
//! file names.

use crate::layout;
use jarvault_core::error::Result;
use jarvault_core::model::{ArtifactCoordinate, Repository, RuntimeVersion};
use jarvault_core::naming::CompiledNaming;
use std::io;
use std::path::{Path, PathBuf};

pub struct LocalRepository {
    pub name: String,
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(repository: &Repository) -> Self {
        Self {
            name: repository.name.clone(),
            root: PathBuf::from(&repository.location),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, coordinate: &ArtifactCoordinate) -> PathBuf {
        self.root
            .join(layout::group_path(coordinate))
            .join(&coordinate.artifact_id)
    }

    /// Lists available versions as the artifact directory's subdirectory
    /// names. `Ok(None)` when the artifact directory does not exist.
    pub fn list_versions(&self, coordinate: &ArtifactCoordinate) -> Result<Option<Vec<String>>> {
        let dir = self.artifact_dir(coordinate);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                versions.push(name.to_string());
            }
        }
        Ok(Some(versions))
    }

    /// Lists available versions by matching file names in the repository
    /// root against a compiled detect pattern. Used for naming-override
    /// layouts where there is no per-version directory structure.
    pub fn list_versions_with_naming(
        &self,
        naming: &CompiledNaming,
        runtime: &RuntimeVersion,
    ) -> Result<Option<Vec<String>>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(detected) = naming.detect(name) {
                let file_runtime = detected.runtime.as_ref().unwrap_or(runtime);
                if let Some(lib) = detected.lib {
                    versions.push(naming.full_version(file_runtime, lib.as_str()));
                }
            }
        }
        Ok(Some(versions))
    }

    /// Path a standard-layout artifact would have; `None` if no file exists
    /// there.
    pub fn locate(
        &self,
        coordinate: &ArtifactCoordinate,
        full_version: &str,
        classifier: Option<&str>,
    ) -> Option<PathBuf> {
        let path = self
            .artifact_dir(coordinate)
            .join(full_version)
            .join(layout::artifact_file_name(coordinate, full_version, classifier));
        path.is_file().then_some(path)
    }

    /// Locates the canonical artifact via a naming override's search
    /// pattern.
    pub fn locate_with_naming(
        &self,
        naming: &CompiledNaming,
        runtime: &RuntimeVersion,
        lib_version: &str,
    ) -> Option<PathBuf> {
        let path = self.root.join(naming.search_path(runtime, lib_version));
        path.is_file().then_some(path)
    }
}

/// Writes the link/marker file pointing a cached jar back at its true
/// source path, so a later hot-reload can diff against the original.
///
/// Prefers a symbolic link; falls back to writing the absolute path as
/// plain text where symlink creation is unsupported.
pub fn write_origin_marker(marker: &Path, source: &Path) -> io::Result<()> {
    let _ = std::fs::remove_file(marker);
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(source, marker).is_ok() {
            return Ok(());
        }
    }
    #[cfg(windows)]
    {
        if std::os::windows::fs::symlink_file(source, marker).is_ok() {
            return Ok(());
        }
    }
    std::fs::write(marker, source.to_string_lossy().as_bytes())
}

/// Resolves an origin marker back to the source path, whichever form it was
/// written in.
pub fn read_origin_marker(marker: &Path) -> Option<PathBuf> {
    if let Ok(target) = std::fs::read_link(marker) {
        return Some(target);
    }
    let text = std::fs::read_to_string(marker).ok()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarvault_core::model::{NamingOverride, RepositoryKind};
    use jarvault_core::naming::NamingCompiler;

    fn local_repo(root: &Path) -> LocalRepository {
        LocalRepository::new(&Repository {
            name: "dev-build".into(),
            location: root.to_string_lossy().into_owned(),
            kind: RepositoryKind::Local,
        })
    }

    fn coordinate() -> ArtifactCoordinate {
        "org.example:plugin-cli".parse().unwrap()
    }

    #[test]
    fn test_list_versions_standard_layout() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("org/example/plugin-cli");
        std::fs::create_dir_all(artifact_dir.join("1.9.24-0.2.2-dev-1")).unwrap();
        std::fs::create_dir_all(artifact_dir.join("1.9.20-0.2.2-dev-1")).unwrap();
        // Stray files are not versions.
        std::fs::write(artifact_dir.join("maven-metadata.xml"), "<metadata/>").unwrap();

        let repo = local_repo(dir.path());
        let mut versions = repo.list_versions(&coordinate()).unwrap().unwrap();
        versions.sort();
        assert_eq!(versions, vec!["1.9.20-0.2.2-dev-1", "1.9.24-0.2.2-dev-1"]);
    }

    #[test]
    fn test_list_versions_missing_artifact_dir() {
        let dir = tempfile::tempdir().unwrap();
        let repo = local_repo(dir.path());
        assert_eq!(repo.list_versions(&coordinate()).unwrap(), None);
    }

    #[test]
    fn test_locate_standard_layout() {
        let dir = tempfile::tempdir().unwrap();
        let version_dir = dir.path().join("org/example/plugin-cli/1.9.24-0.2.2");
        std::fs::create_dir_all(&version_dir).unwrap();
        let jar = version_dir.join("plugin-cli-1.9.24-0.2.2.jar");
        std::fs::write(&jar, "bytes").unwrap();

        let repo = local_repo(dir.path());
        assert_eq!(repo.locate(&coordinate(), "1.9.24-0.2.2", None), Some(jar));
        assert_eq!(
            repo.locate(&coordinate(), "1.9.24-0.2.2", Some(layout::IDE_CLASSIFIER)),
            None
        );
    }

    #[test]
    fn test_naming_override_listing_and_location() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("plugin-cli-1.9.24-0.2.2-dev-1.jar"),
            "bytes",
        )
        .unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "").unwrap();

        let naming = NamingOverride {
            version_pattern: "<kotlin-version>-<lib-version>".into(),
            detect_pattern: "<artifact-id>-<kotlin-version>-<lib-version>.jar".into(),
            search_pattern: "<artifact-id>-<kotlin-version>-<lib-version>.jar".into(),
        };
        let compiled = NamingCompiler::new().get(&naming, &coordinate()).unwrap();
        let runtime = RuntimeVersion::from("1.9.24");

        let repo = local_repo(dir.path());
        let versions = repo
            .list_versions_with_naming(&compiled, &runtime)
            .unwrap()
            .unwrap();
        assert_eq!(versions, vec!["1.9.24-0.2.2-dev-1"]);

        let located = repo.locate_with_naming(&compiled, &runtime, "0.2.2-dev-1");
        assert!(located.is_some());
    }

    #[test]
    fn test_origin_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.jar");
        std::fs::write(&source, "bytes").unwrap();
        let marker = dir.path().join("cached.jar.origin");

        write_origin_marker(&marker, &source).unwrap();
        assert_eq!(read_origin_marker(&marker), Some(source));
    }

    #[test]
    fn test_origin_marker_plain_text_fallback_readable() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("cached.jar.origin");
        std::fs::write(&marker, "/builds/plugin/plugin-cli.jar\n").unwrap();
        assert_eq!(
            read_origin_marker(&marker),
            Some(PathBuf::from("/builds/plugin/plugin-cli.jar"))
        );
    }
}
