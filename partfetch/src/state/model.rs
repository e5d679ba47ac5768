//! Serializable transfer state.
//!
//! These types are the on-disk shape of the state file. Field names are part
//! of the file format and must not change.

use serde::{Deserialize, Serialize};

use crate::plan::{plan, ChunkRange, PlanError};

/// Progress of a single chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Position of the chunk in the plan.
    pub index: usize,
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
    /// Bytes known to be on disk for this chunk.
    pub downloaded: u64,
    /// The full byte range has been written and promoted.
    pub completed: bool,
    /// The post-completion hook succeeded for this chunk.
    #[serde(default)]
    pub post_part_completed: bool,
}

impl ChunkDescriptor {
    /// Byte length of the chunk's range.
    ///
    /// Saturates for ranges that [`TransferState::check_invariants`] rejects.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    /// Always false; a chunk covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The byte range of this chunk.
    pub fn range(&self) -> ChunkRange {
        ChunkRange {
            index: self.index,
            start: self.start,
            end: self.end,
        }
    }
}

impl From<ChunkRange> for ChunkDescriptor {
    fn from(range: ChunkRange) -> Self {
        Self {
            index: range.index,
            start: range.start,
            end: range.end,
            downloaded: 0,
            completed: false,
            post_part_completed: false,
        }
    }
}

/// Complete record of one resumable transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    /// Resource being transferred.
    pub url: String,
    /// Total resource size in bytes.
    pub total_size: u64,
    /// Planned chunk size in bytes.
    pub chunk_size: u64,
    /// Name prefix of every artifact belonging to this transfer.
    pub filename_prefix: String,
    /// Chunks in ascending index order.
    pub chunks: Vec<ChunkDescriptor>,
    /// Number of chunks with `completed == true`.
    pub completed_count: usize,
}

impl TransferState {
    /// Create a fresh state with every chunk pending.
    pub fn new(
        url: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        prefix: impl Into<String>,
    ) -> Result<Self, PlanError> {
        let chunks = plan(total_size, chunk_size)?
            .into_iter()
            .map(ChunkDescriptor::from)
            .collect();

        Ok(Self {
            url: url.into(),
            total_size,
            chunk_size,
            filename_prefix: prefix.into(),
            chunks,
            completed_count: 0,
        })
    }

    /// Whether every chunk's transfer is complete.
    pub fn is_transfer_complete(&self) -> bool {
        self.completed_count == self.chunks.len()
    }

    /// Indices of chunks whose transfer is done but whose hook is not.
    pub fn pending_hooks(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| c.completed && !c.post_part_completed)
            .map(|c| c.index)
            .collect()
    }

    /// Bytes recorded as on disk across all chunks.
    pub fn downloaded_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.downloaded).sum()
    }

    /// Check the structural invariants of a (possibly reloaded) state.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let first = self.chunks.first().ok_or("state has no chunks")?;
        if first.start != 0 {
            return Err(format!("first chunk starts at {} instead of 0", first.start));
        }

        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != position {
                return Err(format!(
                    "chunk at position {} has index {}",
                    position, chunk.index
                ));
            }
            if chunk.end < chunk.start {
                return Err(format!("chunk {} ends before it starts", chunk.index));
            }
            if (chunk.end - chunk.start).checked_add(1).is_none() {
                return Err(format!("chunk {} length overflows", chunk.index));
            }
        }

        for pair in self.chunks.windows(2) {
            if pair[0].end.checked_add(1) != Some(pair[1].start) {
                return Err(format!(
                    "chunks {} and {} are not contiguous",
                    pair[0].index, pair[1].index
                ));
            }
        }

        let last = &self.chunks[self.chunks.len() - 1];
        if self.total_size.checked_sub(1) != Some(last.end) {
            return Err(format!(
                "last chunk ends at {} but total size is {}",
                last.end, self.total_size
            ));
        }

        Ok(())
    }

    /// Recount completed chunks. Returns true if the stored count was wrong.
    pub(crate) fn repair_completed_count(&mut self) -> bool {
        let actual = self.chunks.iter().filter(|c| c.completed).count();
        let was_wrong = actual != self.completed_count;
        self.completed_count = actual;
        was_wrong
    }
}
