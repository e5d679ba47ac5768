//! Grouping of complete chunk artifacts by the transfer they belong to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Pattern of a complete chunk artifact name: `<basename>.<digits>.part`.
///
/// The basename capture is lazy so `a.b.000001.part` yields `a.b`.
fn part_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+?)\.(\d+)\.part$").expect("chunk artifact pattern"))
}

/// Basename and index parsed from a chunk artifact's file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartName {
    /// Name shared by every artifact of one transfer.
    pub basename: String,
    /// Numeric index as written in the file name.
    pub index: u64,
}

/// Parse the file name component of `path`.
///
/// Returns `None` for names that are not chunk artifacts.
pub fn parse_part_name(path: &Path) -> Option<PartName> {
    let name = path.file_name()?.to_str()?;
    let captures = part_file_pattern().captures(name)?;
    let index = captures.get(2)?.as_str().parse().ok()?;

    Some(PartName {
        basename: captures.get(1)?.as_str().to_string(),
        index,
    })
}

/// Artifacts of one transfer, sorted lexicographically by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartGroup {
    /// Shared basename.
    pub basename: String,
    /// Artifact paths in merge order.
    pub files: Vec<PathBuf>,
}

impl PartGroup {
    /// Directory containing the group's artifacts.
    pub fn dir(&self) -> PathBuf {
        self.files
            .first()
            .and_then(|f| f.parent())
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Group paths by basename, dropping anything that is not a chunk artifact.
///
/// Groups come back ordered by basename; files within a group are sorted
/// lexicographically, which is index order thanks to the zero padding.
pub fn group_by_basename(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PartGroup> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for path in paths {
        if let Some(name) = parse_part_name(&path) {
            groups.entry(name.basename).or_default().push(path);
        }
    }

    groups
        .into_iter()
        .map(|(basename, mut files)| {
            files.sort();
            PartGroup { basename, files }
        })
        .collect()
}
