//! Reassembly of complete chunk artifacts into output files.
//!
//! The merge engine works purely from the files on disk: it globs for
//! artifacts, groups them by basename using the `<basename>.<index>.part`
//! naming, and concatenates each group atomically. It never reads the
//! transfer state, so it can reassemble artifacts from any earlier run.
//!
//! # Output selection
//!
//! - With an explicit output, only the group named by the output's file name
//!   is merged. If no such group exists the merge fails, unless the
//!   permissive fallback is enabled, in which case every matched file is
//!   merged into the output.
//! - Without an output, every group is merged into `<dir>/<basename>` next to
//!   its artifacts, each independently.

mod assemble;
mod group;

pub use assemble::{assemble, assembling_path, ASSEMBLING_SUFFIX};
pub use group::{group_by_basename, parse_part_name, PartGroup, PartName};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::state::naming;

/// Default glob pattern for chunk artifacts.
pub const DEFAULT_PATTERN: &str = "*.part";

/// Errors from discovering or assembling chunk artifacts.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The glob pattern is malformed.
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Nothing matched the pattern.
    #[error("no files match pattern: {0}")]
    NoMatches(String),

    /// Files matched but none is a chunk artifact.
    #[error("no chunk artifacts found among files matching {0}")]
    NoChunkArtifacts(String),

    /// The explicit output names no discovered group.
    #[error("no chunk artifacts for '{name}' (found: {})", .available.join(", "))]
    NoMatchingGroup {
        name: String,
        available: Vec<String>,
    },

    /// A chunk artifact could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An appended chunk artifact could not be deleted.
    #[error("failed to delete {}: {source}", .path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The output could not be written or renamed into place.
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Settings of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Output file; selects a single group by its file name.
    pub output: Option<PathBuf>,
    /// Glob pattern used to discover artifacts.
    pub pattern: String,
    /// Delete each artifact once appended and the group's state file on success.
    pub delete_after: bool,
    /// Merge every matched file when no group matches an explicit output.
    pub fallback_to_all_matches: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            output: None,
            pattern: DEFAULT_PATTERN.to_string(),
            delete_after: false,
            fallback_to_all_matches: false,
        }
    }
}

impl MergeOptions {
    /// Options merging the artifacts of `prefix` in `dir` into `<dir>/<prefix>`.
    pub fn for_prefix(dir: &Path, prefix: &str) -> Self {
        Self {
            output: Some(dir.join(prefix)),
            pattern: naming::complete_pattern(dir, prefix),
            ..Self::default()
        }
    }
}

/// Result of merging one group.
#[derive(Debug)]
pub struct GroupMerge {
    /// Basename of the group.
    pub basename: String,
    /// Output path.
    pub output: PathBuf,
    /// Number of artifacts in the group.
    pub parts: usize,
    /// Bytes written, or why the group failed.
    pub result: Result<u64, MergeError>,
}

/// Per-group results of a merge.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// One entry per merged group, in basename order.
    pub groups: Vec<GroupMerge>,
}

impl MergeReport {
    /// Whether every group merged.
    pub fn is_success(&self) -> bool {
        self.groups.iter().all(|g| g.result.is_ok())
    }

    /// Groups that failed.
    pub fn failures(&self) -> impl Iterator<Item = &GroupMerge> {
        self.groups.iter().filter(|g| g.result.is_err())
    }

    /// Total bytes written across successful groups.
    pub fn total_bytes(&self) -> u64 {
        self.groups
            .iter()
            .filter_map(|g| g.result.as_ref().ok())
            .sum()
    }
}

/// Discovers and merges chunk artifacts.
#[derive(Debug, Clone)]
pub struct Merger {
    options: MergeOptions,
}

impl Merger {
    /// Create a merger. An empty pattern falls back to [`DEFAULT_PATTERN`].
    pub fn new(mut options: MergeOptions) -> Self {
        if options.pattern.trim().is_empty() {
            options.pattern = DEFAULT_PATTERN.to_string();
        }
        Self { options }
    }

    /// The effective options.
    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Discover, group and merge.
    ///
    /// Fails outright only when discovery fails or an explicit output has no
    /// matching group in strict mode. Per-group failures are reported in the
    /// returned [`MergeReport`].
    pub fn merge(&self) -> Result<MergeReport, MergeError> {
        let matches = self.discover()?;
        let groups = group_by_basename(matches.iter().cloned());

        let plan = match &self.options.output {
            Some(output) => vec![self.select_group(output, groups, &matches)?],
            None => {
                if groups.is_empty() {
                    return Err(MergeError::NoChunkArtifacts(self.options.pattern.clone()));
                }
                if groups.len() > 1 {
                    info!(groups = groups.len(), "Found multiple download sessions to merge");
                }
                groups
                    .into_iter()
                    .map(|group| {
                        let output = group.dir().join(&group.basename);
                        (group, output)
                    })
                    .collect()
            }
        };

        let groups = plan
            .into_iter()
            .map(|(group, output)| self.merge_group(group, output))
            .collect();

        Ok(MergeReport { groups })
    }

    fn discover(&self) -> Result<Vec<PathBuf>, MergeError> {
        let pattern = &self.options.pattern;
        let entries = glob::glob(pattern).map_err(|source| MergeError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        let mut matches = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) => matches.push(path),
                Err(e) => warn!(error = %e, "Skipping unreadable match"),
            }
        }

        if matches.is_empty() {
            return Err(MergeError::NoMatches(pattern.clone()));
        }
        Ok(matches)
    }

    fn select_group(
        &self,
        output: &Path,
        groups: Vec<PartGroup>,
        matches: &[PathBuf],
    ) -> Result<(PartGroup, PathBuf), MergeError> {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let available: Vec<String> = groups.iter().map(|g| g.basename.clone()).collect();
        if let Some(group) = groups.into_iter().find(|g| g.basename == name) {
            return Ok((group, output.to_path_buf()));
        }

        if !self.options.fallback_to_all_matches {
            return Err(MergeError::NoMatchingGroup { name, available });
        }

        warn!(
            output = %output.display(),
            files = matches.len(),
            "No group matches the output name, merging every matched file"
        );
        let mut files = matches.to_vec();
        files.sort();
        Ok((
            PartGroup {
                basename: name,
                files,
            },
            output.to_path_buf(),
        ))
    }

    fn merge_group(&self, group: PartGroup, output: PathBuf) -> GroupMerge {
        info!(
            basename = %group.basename,
            parts = group.files.len(),
            output = %output.display(),
            "Merging chunk artifacts"
        );

        let result = assemble(&group.files, &output, self.options.delete_after);

        match &result {
            Ok(bytes) => {
                info!(output = %output.display(), bytes, "Merge complete");
                if self.options.delete_after {
                    delete_state_file(&group);
                }
            }
            Err(e) => warn!(basename = %group.basename, error = %e, "Merge failed"),
        }

        GroupMerge {
            basename: group.basename,
            output,
            parts: group.files.len(),
            result,
        }
    }
}

/// Remove a merged group's state file. Failures are logged.
fn delete_state_file(group: &PartGroup) {
    let state_file = naming::state_file_path(&group.dir(), &group.basename);
    match fs::remove_file(&state_file) {
        Ok(()) => info!(path = %state_file.display(), "Deleted state file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %state_file.display(), error = %e, "Failed to delete state file"),
    }
}
