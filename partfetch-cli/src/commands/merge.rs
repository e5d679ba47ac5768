//! Merge command.

use std::path::PathBuf;

use console::style;
use partfetch::config::format_size;
use partfetch::merge::{MergeOptions, Merger};

use super::common::init;
use crate::error::CliError;

/// Arguments for the merge command.
pub struct MergeArgs {
    pub output: Option<PathBuf>,
    pub pattern: String,
    pub delete: bool,
    pub fallback_all: bool,
}

/// Run the merge command.
pub fn run(args: MergeArgs, log_level: Option<String>) -> Result<(), CliError> {
    let (_config, _log_guard) = init(log_level)?;

    let merger = Merger::new(MergeOptions {
        output: args.output,
        pattern: args.pattern,
        delete_after: args.delete,
        fallback_to_all_matches: args.fallback_all,
    });

    let report = merger.merge()?;

    for group in &report.groups {
        match &group.result {
            Ok(bytes) => println!(
                "{} {} ({} parts, {})",
                style("Merged").green().bold(),
                group.output.display(),
                group.parts,
                format_size(*bytes)
            ),
            Err(e) => eprintln!(
                "{} {}: {}",
                style("Failed").red().bold(),
                group.output.display(),
                e
            ),
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        return Err(CliError::Config(format!(
            "{} of {} groups failed to merge",
            failed,
            report.groups.len()
        )));
    }

    if report.groups.len() > 1 {
        println!(
            "Merged {} groups, {} total",
            report.groups.len(),
            format_size(report.total_bytes())
        );
    }

    Ok(())
}
