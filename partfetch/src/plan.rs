//! Chunk planning.
//!
//! Splits a resource of known size into a deterministic, ordered sequence of
//! inclusive byte ranges. Every other component addresses chunks by the index
//! assigned here, so the plan for a given `(total_size, chunk_size)` pair must
//! never change between runs.

use thiserror::Error;

/// Errors that can occur while planning chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The resource has no bytes to transfer.
    #[error("invalid total size: {0} (must be greater than zero)")]
    InvalidTotalSize(u64),

    /// The chunk size cannot partition anything.
    #[error("invalid chunk size: {0} (must be greater than zero)")]
    InvalidChunkSize(u64),
}

/// One inclusive byte range of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    /// Position of the chunk in the plan (0-based).
    pub index: usize,
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ChunkRange {
    /// Number of bytes covered by this range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a planned range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Number of chunks needed to cover `total_size` bytes.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> Result<usize, PlanError> {
    validate(total_size, chunk_size)?;
    Ok(total_size.div_ceil(chunk_size) as usize)
}

/// Partition `[0, total_size - 1]` into ranges of `chunk_size` bytes.
///
/// The last range is shorter when `total_size` is not a multiple of
/// `chunk_size`.
///
/// # Example
///
/// ```
/// use partfetch::plan::plan;
///
/// let ranges = plan(2500, 1000).unwrap();
/// let bounds: Vec<_> = ranges.iter().map(|r| (r.start, r.end)).collect();
/// assert_eq!(bounds, vec![(0, 999), (1000, 1999), (2000, 2499)]);
/// ```
pub fn plan(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkRange>, PlanError> {
    let count = chunk_count(total_size, chunk_size)?;

    let ranges = (0..count)
        .map(|index| {
            let start = index as u64 * chunk_size;
            let end = start.saturating_add(chunk_size).min(total_size) - 1;
            ChunkRange { index, start, end }
        })
        .collect();

    Ok(ranges)
}

fn validate(total_size: u64, chunk_size: u64) -> Result<(), PlanError> {
    if total_size == 0 {
        return Err(PlanError::InvalidTotalSize(total_size));
    }
    if chunk_size == 0 {
        return Err(PlanError::InvalidChunkSize(chunk_size));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_uneven_tail() {
        let ranges = plan(2500, 1000).unwrap();

        assert_eq!(ranges.len(), 3);
        assert_eq!((ranges[0].start, ranges[0].end), (0, 999));
        assert_eq!((ranges[1].start, ranges[1].end), (1000, 1999));
        assert_eq!((ranges[2].start, ranges[2].end), (2000, 2499));
        assert_eq!(ranges[2].len(), 500);
    }

    #[test]
    fn test_plan_single_chunk_when_sizes_equal() {
        let ranges = plan(1000, 1000).unwrap();
        assert_eq!(ranges, vec![ChunkRange { index: 0, start: 0, end: 999 }]);
    }

    #[test]
    fn test_plan_exact_multiple() {
        let ranges = plan(3000, 1000).unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].end, 2999);
    }

    #[test]
    fn test_plan_chunk_larger_than_total() {
        let ranges = plan(10, 1 << 20).unwrap();
        assert_eq!(ranges, vec![ChunkRange { index: 0, start: 0, end: 9 }]);
    }

    #[test]
    fn test_plan_rejects_zero_sizes() {
        assert_eq!(plan(0, 1000), Err(PlanError::InvalidTotalSize(0)));
        assert_eq!(plan(1000, 0), Err(PlanError::InvalidChunkSize(0)));
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(1, 1).unwrap(), 1);
        assert_eq!(chunk_count(1001, 1000).unwrap(), 2);
        assert!(chunk_count(0, 1).is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_plan_covers_resource_contiguously(
                total in 1u64..5_000_000,
                chunk in 1u64..1_000_000
            ) {
                let ranges = plan(total, chunk)?;

                prop_assert_eq!(ranges.len() as u64, total.div_ceil(chunk));
                prop_assert_eq!(ranges[0].start, 0);
                prop_assert_eq!(ranges[ranges.len() - 1].end, total - 1);

                for (i, pair) in ranges.windows(2).enumerate() {
                    prop_assert_eq!(pair[0].index, i);
                    prop_assert_eq!(pair[0].end + 1, pair[1].start);
                    prop_assert_eq!(pair[0].len(), chunk);
                }

                let covered: u64 = ranges.iter().map(ChunkRange::len).sum();
                prop_assert_eq!(covered, total);
            }
        }
    }
}
