//! Durable transfer state.
//!
//! This module owns the single source of truth for what has been downloaded:
//! - The serializable model (`model`)
//! - Artifact and state file naming (`naming`)
//! - The synchronized, atomically persisted store (`store`)
//!
//! # State file
//!
//! One JSON file per name prefix, `.<prefix>-state.json`, stored next to the
//! chunk artifacts:
//!
//! ```text
//! {
//!   "url": "https://example.com/file.bin",
//!   "total_size": 2500,
//!   "chunk_size": 1000,
//!   "filename_prefix": "file.bin",
//!   "chunks": [
//!     { "index": 0, "start": 0, "end": 999, "downloaded": 1000,
//!       "completed": true, "post_part_completed": false },
//!     ...
//!   ],
//!   "completed_count": 1
//! }
//! ```

mod model;
pub mod naming;
mod store;

pub use model::{ChunkDescriptor, TransferState};
pub use store::StateStore;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::plan::PlanError;

/// Errors that can occur while loading, validating or persisting state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested plan is invalid.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The state file exists but could not be read.
    #[error("failed to read state file {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    /// The state file could not be written, renamed or removed.
    #[error("failed to write state file {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The state file is not valid JSON for a transfer state.
    #[error("failed to parse state file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The state could not be serialized.
    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The state file parsed but describes an impossible plan.
    #[error("state file {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A background save task panicked or was cancelled.
    #[error("state save task failed: {0}")]
    Task(String),

    /// The stored state belongs to a different resource than the request.
    #[error(
        "existing state for '{prefix}' is for {stored_url} ({stored_size} bytes), \
         not {requested_url} ({requested_size} bytes); force a restart to discard it"
    )]
    Mismatch {
        prefix: String,
        stored_url: String,
        stored_size: u64,
        requested_url: String,
        requested_size: u64,
    },
}
