//! Jar class extraction.

use jarvault_core::error::{BundleError, Result};
use std::collections::HashSet;
use std::path::Path;

/// Enumerates the fully-qualified class names a jar defines.
///
/// Directory entries, `module-info`/`package-info` descriptor classes, and
/// compiler-synthetic numbered inner classes (`Foo$1`) are excluded; named
/// inner classes (`Foo$Inner`) are kept.
pub fn jar_classes(path: &Path) -> Result<HashSet<String>> {
    let file = std::fs::File::open(path)?;
    let archive = zip::ZipArchive::new(file).map_err(|e| BundleError::Archive {
        path: path.to_path_buf(),
        source: Box::new(e),
    })?;

    let mut classes = HashSet::new();
    for name in archive.file_names() {
        let Some(stem) = name.strip_suffix(".class") else {
            continue;
        };
        if stem.ends_with('/') {
            continue;
        }
        let simple = stem.rsplit('/').next().unwrap_or(stem);
        if simple == "module-info" || simple == "package-info" {
            continue;
        }
        if is_synthetic_inner(simple) {
            continue;
        }
        classes.insert(stem.replace('/', "."));
    }
    Ok(classes)
}

/// True for `Outer$1`, `Outer$Inner$2` and the like, where the last
/// `$`-delimited segment is purely numeric.
fn is_synthetic_inner(simple_name: &str) -> bool {
    match simple_name.rsplit_once('$') {
        Some((_, suffix)) => !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Drops trailing synthetic segments from a stack frame's class name so it
/// can be looked up against the index built by [`jar_classes`].
pub fn normalize_frame_class(declaring_class: &str) -> &str {
    let mut name = declaring_class;
    while let Some((outer, suffix)) = name.rsplit_once('$') {
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            name = outer;
        } else {
            break;
        }
    }
    name
}
