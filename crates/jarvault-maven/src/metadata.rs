//! Version manifest parsing.
//!
//! Remote repositories publish a Maven-metadata-compatible XML document;
//! the only part consumed here is the
//! `metadata/versioning/versions/version*` text nodes.

use jarvault_core::error::{BundleError, Result};
use regex::Regex;
use std::sync::OnceLock;

fn versions_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<versions>(.*?)</versions>").expect("static regex"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<version>\s*([^<]+?)\s*</version>").expect("static regex"))
}

/// Extracts the available version strings from a metadata document.
///
/// A document without a `<metadata>` element is malformed (the repository
/// answered with something else entirely, e.g. an HTML error page) and maps
/// to a parse error; a well-formed document with no `<versions>` block or
/// an empty one yields an empty list.
pub fn parse_versions(document: &str) -> Result<Vec<String>> {
    if !document.contains("<metadata") {
        return Err(BundleError::Manifest(
            "document has no <metadata> element".into(),
        ));
    }

    let Some(block) = versions_block_re().captures(document) else {
        return Ok(Vec::new());
    };

    Ok(version_re()
        .captures_iter(&block[1])
        .map(|c| c[1].to_string())
        .collect())
}
