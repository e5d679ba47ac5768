//! partfetch - resumable chunked HTTP downloads
//!
//! A remote resource is split into fixed-size byte ranges that are fetched
//! concurrently with HTTP range requests. Each finished range becomes a
//! `<prefix>.<index>.part` file, progress is persisted to a JSON state file
//! after every completed chunk, and an interrupted run resumes from where it
//! stopped. An optional shell hook runs per finished chunk, and the merge
//! step concatenates chunk files back into the original resource.
//!
//! The main entry points are [`download::Downloader`] and [`merge::Merger`].

pub mod config;
pub mod download;
pub mod fetch;
pub mod hooks;
pub mod logging;
pub mod merge;
pub mod plan;
pub mod progress;
pub mod scheduler;
pub mod state;
pub mod transport;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
