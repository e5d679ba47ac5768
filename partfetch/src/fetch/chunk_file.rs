//! On-disk artifacts of one chunk.
//!
//! A chunk is written to its partial artifact in append mode and renamed to
//! its complete artifact once the full range is on disk. The rename is the
//! commit point: a complete artifact always holds the whole range.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};

/// Partial and complete artifact paths of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    partial: PathBuf,
    complete: PathBuf,
}

impl ChunkFile {
    /// Describe the artifacts at `partial` and `complete`.
    pub fn new(partial: impl Into<PathBuf>, complete: impl Into<PathBuf>) -> Self {
        Self {
            partial: partial.into(),
            complete: complete.into(),
        }
    }

    /// Path of the partial artifact.
    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    /// Path of the complete artifact.
    pub fn complete_path(&self) -> &Path {
        &self.complete
    }

    /// Whether the complete artifact exists.
    ///
    /// Errors other than "not found" are returned rather than treated as
    /// absent, so an unreadable artifact is never fetched over.
    pub async fn is_complete(&self) -> io::Result<bool> {
        fs::try_exists(&self.complete).await
    }

    /// Current length of the partial artifact, 0 when it does not exist.
    pub async fn partial_len(&self) -> io::Result<u64> {
        match fs::metadata(&self.partial).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Open the partial artifact for appending, creating it if needed.
    pub async fn open_append(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.partial)
            .await
    }

    /// Remove the partial artifact. A missing file is not an error.
    pub async fn discard_partial(&self) -> io::Result<()> {
        match fs::remove_file(&self.partial).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Atomically rename the partial artifact to the complete artifact.
    pub async fn promote(&self) -> io::Result<()> {
        fs::rename(&self.partial, &self.complete).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn chunk_file(dir: &TempDir) -> ChunkFile {
        ChunkFile::new(dir.path().join("f.000000.tmp"), dir.path().join("f.000000.part"))
    }

    #[tokio::test]
    async fn test_partial_len_missing_is_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(chunk_file(&dir).partial_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_resumes_after_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let file = chunk_file(&dir);

        let mut handle = file.open_append().await.unwrap();
        handle.write_all(b"hello ").await.unwrap();
        handle.flush().await.unwrap();
        drop(handle);

        let mut handle = file.open_append().await.unwrap();
        handle.write_all(b"world").await.unwrap();
        handle.flush().await.unwrap();
        drop(handle);

        assert_eq!(file.partial_len().await.unwrap(), 11);
        assert_eq!(
            std::fs::read(file.partial_path()).unwrap(),
            b"hello world".to_vec()
        );
    }

    #[tokio::test]
    async fn test_promote_renames() {
        let dir = TempDir::new().unwrap();
        let file = chunk_file(&dir);
        std::fs::write(file.partial_path(), b"data").unwrap();

        assert!(!file.is_complete().await.unwrap());
        file.promote().await.unwrap();

        assert!(file.is_complete().await.unwrap());
        assert!(!file.partial_path().exists());
        assert_eq!(std::fs::read(file.complete_path()).unwrap(), b"data".to_vec());
    }

    #[tokio::test]
    async fn test_is_complete_reports_lookup_errors() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = dir.path().join("plain");
        std::fs::write(&not_a_dir, b"file").unwrap();
        let file = ChunkFile::new(not_a_dir.join("f.part.tmp"), not_a_dir.join("f.part"));

        assert!(file.is_complete().await.is_err());
    }

    #[tokio::test]
    async fn test_discard_partial_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let file = chunk_file(&dir);
        std::fs::write(file.partial_path(), b"junk").unwrap();

        file.discard_partial().await.unwrap();
        assert!(!file.partial_path().exists());
        file.discard_partial().await.unwrap();
    }
}
