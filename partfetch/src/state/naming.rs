//! File naming for chunk artifacts and state files.
//!
//! Index fields are zero-padded to six digits. The merge engine sorts
//! artifacts lexicographically and relies on this fixed width to recover
//! index order.

use std::path::{Path, PathBuf};

use glob::Pattern;

/// Suffix of a chunk whose byte range is still being written.
pub const PARTIAL_SUFFIX: &str = "tmp";

/// Suffix of a chunk whose full byte range is on disk.
pub const COMPLETE_SUFFIX: &str = "part";

/// Prefix used when a URL has no usable final path segment.
pub const DEFAULT_PREFIX: &str = "download";

/// Name of the partial artifact for `index`.
pub fn partial_name(prefix: &str, index: usize) -> String {
    format!("{}.{:06}.{}", prefix, index, PARTIAL_SUFFIX)
}

/// Name of the complete artifact for `index`.
pub fn complete_name(prefix: &str, index: usize) -> String {
    format!("{}.{:06}.{}", prefix, index, COMPLETE_SUFFIX)
}

/// Name of the persisted state file for a prefix.
pub fn state_file_name(prefix: &str) -> String {
    format!(".{}-state.json", prefix)
}

/// Path of the persisted state file for a prefix inside `dir`.
pub fn state_file_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(state_file_name(prefix))
}

/// Glob pattern matching every complete artifact of a prefix inside `dir`.
pub fn complete_pattern(dir: &Path, prefix: &str) -> String {
    artifact_pattern(dir, prefix, COMPLETE_SUFFIX)
}

/// Glob pattern matching every partial artifact of a prefix inside `dir`.
pub fn partial_pattern(dir: &Path, prefix: &str) -> String {
    artifact_pattern(dir, prefix, PARTIAL_SUFFIX)
}

// Directory and prefix are escaped so only the index is a wildcard.
fn artifact_pattern(dir: &Path, prefix: &str, suffix: &str) -> String {
    let name = format!("{}.*.{}", Pattern::escape(prefix), suffix);
    let dir = dir.to_string_lossy();
    if dir.is_empty() {
        name
    } else {
        Path::new(Pattern::escape(&dir).as_str())
            .join(name)
            .to_string_lossy()
            .into_owned()
    }
}

/// Derive the artifact name prefix from a URL.
///
/// Takes the last path segment after stripping any fragment and query
/// string. Falls back to [`DEFAULT_PREFIX`] when nothing usable remains.
pub fn prefix_from_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);

    let segment = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");

    // "https:" is what is left for a bare scheme-only string
    if segment.is_empty() || segment.ends_with(':') || segment == "." || segment == ".." {
        DEFAULT_PREFIX.to_string()
    } else {
        segment.to_string()
    }
}
