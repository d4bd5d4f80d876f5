//! Naming-override template compilation.
//!
//! Non-standard local build layouts describe their artifact file names with
//! three macro-templated strings (see [`NamingOverride`]). Templates use
//! the `<kotlin-version>`, `<lib-version>` and `<artifact-id>` placeholders.
//! The detect pattern compiles to a regex with named capture groups for the
//! two version placeholders; the search and version patterns are expanded
//! by literal substitution. Compiled patterns are cached per coordinate.

use crate::error::{BundleError, Result};
use crate::model::{
    ArtifactCoordinate, NamingOverride, RequestedVersion, RuntimeVersion,
};
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;

pub const RUNTIME_VERSION_MACRO: &str = "<kotlin-version>";
pub const LIB_VERSION_MACRO: &str = "<lib-version>";
pub const ARTIFACT_ID_MACRO: &str = "<artifact-id>";

const RUNTIME_GROUP: &str = "runtime";
const LIB_GROUP: &str = "lib";

/// Version components extracted from a file name by a detect pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedVersions {
    pub runtime: Option<RuntimeVersion>,
    pub lib: Option<RequestedVersion>,
}

/// A [`NamingOverride`] compiled for one artifact coordinate.
pub struct CompiledNaming {
    detect: Regex,
    search_pattern: String,
    version_pattern: String,
    artifact_id: String,
}

impl CompiledNaming {
    fn compile(naming: &NamingOverride, coordinate: &ArtifactCoordinate) -> Result<Self> {
        let detect = template_to_regex(&naming.detect_pattern, &coordinate.artifact_id)?;
        Ok(Self {
            detect,
            search_pattern: naming.search_pattern.clone(),
            version_pattern: naming.version_pattern.clone(),
            artifact_id: coordinate.artifact_id.clone(),
        })
    }

    /// Matches a file name against the detect pattern and extracts the
    /// embedded version components.
    pub fn detect(&self, file_name: &str) -> Option<DetectedVersions> {
        let captures = self.detect.captures(file_name)?;
        Some(DetectedVersions {
            runtime: captures
                .name(RUNTIME_GROUP)
                .map(|m| RuntimeVersion::new(m.as_str())),
            lib: captures
                .name(LIB_GROUP)
                .map(|m| RequestedVersion::new(m.as_str())),
        })
    }

    /// Expands the search pattern into the relative path of the canonical
    /// artifact for the given versions.
    pub fn search_path(&self, runtime: &RuntimeVersion, lib: &str) -> String {
        substitute(&self.search_pattern, &self.artifact_id, runtime.as_str(), lib)
    }

    /// Expands the version pattern into a full version string.
    pub fn full_version(&self, runtime: &RuntimeVersion, lib: &str) -> String {
        substitute(&self.version_pattern, &self.artifact_id, runtime.as_str(), lib)
    }
}

fn substitute(template: &str, artifact_id: &str, runtime: &str, lib: &str) -> String {
    template
        .replace(ARTIFACT_ID_MACRO, artifact_id)
        .replace(RUNTIME_VERSION_MACRO, runtime)
        .replace(LIB_VERSION_MACRO, lib)
}

/// Compiles a detect template into an anchored regex: literal text is
/// escaped, version macros become named capture groups, the artifact-id
/// macro becomes the escaped artifact id.
fn template_to_regex(template: &str, artifact_id: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(template.len() * 2);
    pattern.push('^');

    let mut rest = template;
    while let Some(idx) = rest.find('<') {
        pattern.push_str(&regex::escape(&rest[..idx]));
        rest = &rest[idx..];
        if let Some(tail) = rest.strip_prefix(RUNTIME_VERSION_MACRO) {
            pattern.push_str(&format!("(?P<{RUNTIME_GROUP}>[0-9][0-9A-Za-z.]*)"));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(LIB_VERSION_MACRO) {
            pattern.push_str(&format!("(?P<{LIB_GROUP}>[0-9][0-9A-Za-z.\\-]*)"));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(ARTIFACT_ID_MACRO) {
            pattern.push_str(&regex::escape(artifact_id));
            rest = tail;
        } else {
            return Err(BundleError::InvalidTemplate(format!(
                "unknown placeholder in {template:?}"
            )));
        }
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    Regex::new(&pattern).map_err(|e| BundleError::InvalidTemplate(e.to_string()))
}

/// Compiles and caches naming overrides per coordinate.
///
/// Explicitly constructed and owned by the resolver; no ambient state.
#[derive(Default)]
pub struct NamingCompiler {
    cache: DashMap<(ArtifactCoordinate, String), Arc<CompiledNaming>>,
}

impl NamingCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled form of `naming` for `coordinate`, compiling at
    /// most once per (coordinate, detect pattern) pair.
    pub fn get(
        &self,
        naming: &NamingOverride,
        coordinate: &ArtifactCoordinate,
    ) -> Result<Arc<CompiledNaming>> {
        let key = (coordinate.clone(), naming.detect_pattern.clone());
        if let Some(compiled) = self.cache.get(&key) {
            return Ok(Arc::clone(&compiled));
        }
        let compiled = Arc::new(CompiledNaming::compile(naming, coordinate)?);
        self.cache.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> NamingOverride {
        NamingOverride {
            version_pattern: "<kotlin-version>-<lib-version>".into(),
            detect_pattern: "<artifact-id>-<kotlin-version>-<lib-version>.jar".into(),
            search_pattern: "<artifact-id>/build/libs/<artifact-id>-<kotlin-version>-<lib-version>.jar"
                .into(),
        }
    }

    fn coordinate() -> ArtifactCoordinate {
        "org.example:plugin-cli".parse().unwrap()
    }

    #[test]
    fn test_detect_extracts_versions() {
        let compiler = NamingCompiler::new();
        let compiled = compiler.get(&naming(), &coordinate()).unwrap();

        let detected = compiled
            .detect("plugin-cli-1.9.24-0.2.2-dev-1.jar")
            .expect("file name should match");
        assert_eq!(detected.runtime, Some(RuntimeVersion::from("1.9.24")));
        assert_eq!(detected.lib, Some(RequestedVersion::from("0.2.2-dev-1")));
    }

    #[test]
    fn test_detect_rejects_other_artifacts() {
        let compiler = NamingCompiler::new();
        let compiled = compiler.get(&naming(), &coordinate()).unwrap();
        assert!(compiled.detect("plugin-k2-1.9.24-0.2.2-dev-1.jar").is_none());
        assert!(compiled.detect("plugin-cli.jar").is_none());
    }

    #[test]
    fn test_search_path_substitution() {
        let compiler = NamingCompiler::new();
        let compiled = compiler.get(&naming(), &coordinate()).unwrap();
        assert_eq!(
            compiled.search_path(&RuntimeVersion::from("1.9.24"), "0.2.2-dev-1"),
            "plugin-cli/build/libs/plugin-cli-1.9.24-0.2.2-dev-1.jar"
        );
    }

    #[test]
    fn test_full_version_substitution() {
        let compiler = NamingCompiler::new();
        let compiled = compiler.get(&naming(), &coordinate()).unwrap();
        assert_eq!(
            compiled.full_version(&RuntimeVersion::from("1.9.24"), "0.2.2-dev-1"),
            "1.9.24-0.2.2-dev-1"
        );
    }

    #[test]
    fn test_compile_cached_per_coordinate() {
        let compiler = NamingCompiler::new();
        let first = compiler.get(&naming(), &coordinate()).unwrap();
        let second = compiler.get(&naming(), &coordinate()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let bad = NamingOverride {
            version_pattern: "<kotlin-version>".into(),
            detect_pattern: "<artifact-id>-<unknown>.jar".into(),
            search_pattern: "<artifact-id>.jar".into(),
        };
        assert!(NamingCompiler::new().get(&bad, &coordinate()).is_err());
    }

    #[test]
    fn test_literal_dots_escaped() {
        let compiler = NamingCompiler::new();
        let compiled = compiler.get(&naming(), &coordinate()).unwrap();
        // The ".jar" suffix is literal; "Xjar" must not match.
        assert!(compiled.detect("plugin-cli-1.9.24-0.2.2Xjar").is_none());
    }
}
