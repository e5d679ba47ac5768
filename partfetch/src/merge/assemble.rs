//! Concatenation of chunk artifacts into a single output file.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::MergeError;

/// Suffix of the in-progress output file.
pub const ASSEMBLING_SUFFIX: &str = "assembling";

/// Copy buffer size (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Path of the temporary file used while assembling `output`.
pub fn assembling_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".");
    name.push(ASSEMBLING_SUFFIX);
    PathBuf::from(name)
}

/// Concatenate `parts` in order into `output`.
///
/// Bytes go to `<output>.assembling` first, which is renamed over `output`
/// only after every part was copied and flushed.
///
/// With `delete_appended`, each part is removed as soon as its bytes are
/// synced into the temporary file, so a large merge needs little more than
/// one part of extra disk space. On failure the temporary file is removed
/// unless it already holds bytes of deleted parts; in that case it is kept
/// so no downloaded data is lost. Without `delete_appended` a failure leaves
/// every source untouched.
///
/// Returns the number of bytes written.
pub fn assemble(
    parts: &[PathBuf],
    output: &Path,
    delete_appended: bool,
) -> Result<u64, MergeError> {
    let tmp_path = assembling_path(output);
    let mut consumed = 0;

    let result =
        write_parts(parts, &tmp_path, delete_appended, &mut consumed).and_then(|total| {
            fs::rename(&tmp_path, output).map_err(|source| MergeError::Write {
                path: output.to_path_buf(),
                source,
            })?;
            Ok(total)
        });

    if result.is_err() {
        if consumed == 0 {
            remove_temp(&tmp_path);
        } else {
            warn!(
                path = %tmp_path.display(),
                deleted_parts = consumed,
                "Merge failed after deleting appended parts, keeping partial output"
            );
        }
    }
    result
}

fn write_parts(
    parts: &[PathBuf],
    tmp_path: &Path,
    delete_appended: bool,
    consumed: &mut usize,
) -> Result<u64, MergeError> {
    if let Some(parent) = tmp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| MergeError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let write_err = |source: io::Error| MergeError::Write {
        path: tmp_path.to_path_buf(),
        source,
    };

    let file = File::create(tmp_path).map_err(write_err)?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    for (position, part) in parts.iter().enumerate() {
        debug!(
            part = %part.display(),
            position = position + 1,
            count = parts.len(),
            "Appending chunk"
        );

        let read_err = |source: io::Error| MergeError::Read {
            path: part.clone(),
            source,
        };

        let mut reader = BufReader::new(File::open(part).map_err(read_err)?);
        loop {
            let read = reader.read(&mut buffer).map_err(read_err)?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read]).map_err(write_err)?;
            total += read as u64;
        }

        if delete_appended {
            // The part's bytes must be durable before the source goes away.
            writer.flush().map_err(write_err)?;
            writer.get_ref().sync_data().map_err(write_err)?;
            fs::remove_file(part).map_err(|source| MergeError::Delete {
                path: part.clone(),
                source,
            })?;
            *consumed += 1;
            debug!(part = %part.display(), "Deleted appended chunk");
        }
    }

    let file = writer
        .into_inner()
        .map_err(|e| write_err(e.into_error()))?;
    file.sync_all().map_err(write_err)?;

    Ok(total)
}

fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary merge file");
        }
    }
}
