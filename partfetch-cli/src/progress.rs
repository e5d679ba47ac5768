//! Terminal progress bar for downloads.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use partfetch::progress::{ProgressCallback, ProgressSnapshot};

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}, {eta}) {msg}";

/// Progress bar fed by download snapshots.
#[derive(Clone)]
pub struct DownloadProgress {
    bar: ProgressBar,
}

impl DownloadProgress {
    /// A visible bar on stderr, or a hidden one when `enabled` is false.
    pub fn new(enabled: bool) -> Self {
        let bar = if enabled {
            ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };

        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }

        Self { bar }
    }

    /// Apply one snapshot.
    pub fn update(&self, snapshot: &ProgressSnapshot) {
        self.bar.set_length(snapshot.total_bytes);
        self.bar.set_position(snapshot.bytes_done);
        self.bar.set_message(chunk_message(snapshot));
    }

    /// Callback to hand to the downloader.
    pub fn callback(&self) -> ProgressCallback {
        let progress = self.clone();
        Arc::new(move |snapshot| progress.update(&snapshot))
    }

    /// Leave the final state on screen.
    pub fn finish(&self) {
        self.bar.finish();
    }

    /// Remove the bar, e.g. before printing an interruption notice.
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

fn chunk_message(snapshot: &ProgressSnapshot) -> String {
    format!(
        "chunks {}/{}",
        snapshot.chunks_completed, snapshot.total_chunks
    )
}
