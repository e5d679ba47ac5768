//! partfetch CLI
//!
//! Resumable chunked HTTP downloads from the command line.

mod commands;
mod error;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::common::parse_size_arg;
use commands::config::ConfigCommands;
use commands::download::DownloadArgs;
use commands::merge::MergeArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "partfetch")]
#[command(version, about = "Chunked HTTP downloader with resume support", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file using chunked HTTP range requests
    Download {
        /// URL of the file to download
        url: String,

        /// Chunk size with optional K, M or G suffix (default: 100M)
        #[arg(short = 'c', long, value_parser = parse_size_arg)]
        chunk_size: Option<u64>,

        /// Proxy URL (e.g., socks5h://127.0.0.1:9050)
        #[arg(short = 'x', long)]
        proxy: Option<String>,

        /// Retries per chunk (default: 10)
        #[arg(short = 'r', long)]
        retries: Option<u32>,

        /// Skip the HEAD request; requires --size
        #[arg(long, requires = "size")]
        no_head: bool,

        /// Total size in bytes
        #[arg(long, value_parser = parse_size_arg)]
        size: Option<u64>,

        /// Concurrent chunk downloads (default: 1)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Discard saved state and existing chunks and start over
        #[arg(long)]
        force: bool,

        /// Merge the chunks into the original file once the download completes
        #[arg(long)]
        merge: bool,

        /// Command to run after each chunk completes.
        /// Placeholders: {part} {idx} {base}
        #[arg(long)]
        post_part: Option<String>,

        /// Concurrent post-part commands (0 = default pool of 10)
        #[arg(long)]
        post_part_jobs: Option<usize>,

        /// Directory for chunks, the state file and the merged output
        #[arg(short = 'o', long)]
        output_dir: Option<PathBuf>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Merge chunk files into the original file(s)
    Merge {
        /// Output file; selects the group with this name
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Glob pattern used to find chunk files
        #[arg(long, default_value = partfetch::merge::DEFAULT_PATTERN)]
        pattern: String,

        /// Delete chunk files and the state file after a successful merge
        #[arg(long)]
        delete: bool,

        /// With --output, merge every matched file when no group matches
        #[arg(long, requires = "output")]
        fallback_all: bool,
    },

    /// View and modify configuration settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Download {
            url,
            chunk_size,
            proxy,
            retries,
            no_head,
            size,
            jobs,
            force,
            merge,
            post_part,
            post_part_jobs,
            output_dir,
            no_progress,
        } => commands::download::run(
            DownloadArgs {
                url,
                chunk_size,
                proxy,
                retries,
                no_head,
                size,
                jobs,
                force,
                merge,
                post_part,
                post_part_jobs,
                output_dir,
                no_progress,
            },
            cli.log_level,
        ),

        Commands::Merge {
            output,
            pattern,
            delete,
            fallback_all,
        } => commands::merge::run(
            MergeArgs {
                output,
                pattern,
                delete,
                fallback_all,
            },
            cli.log_level,
        ),

        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_download_flags() {
        let cli = Cli::try_parse_from([
            "partfetch",
            "download",
            "-c",
            "50M",
            "-j",
            "4",
            "--post-part",
            "gzip {part}",
            "https://example.com/file.bin",
        ])
        .unwrap();

        match cli.command {
            Commands::Download {
                url,
                chunk_size,
                jobs,
                post_part,
                ..
            } => {
                assert_eq!(url, "https://example.com/file.bin");
                assert_eq!(chunk_size, Some(50_000_000));
                assert_eq!(jobs, Some(4));
                assert_eq!(post_part.as_deref(), Some("gzip {part}"));
            }
            _ => panic!("expected download command"),
        }
    }

    #[test]
    fn test_no_head_requires_size() {
        let result = Cli::try_parse_from([
            "partfetch",
            "download",
            "--no-head",
            "https://example.com/file.bin",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from([
            "partfetch",
            "download",
            "--no-head",
            "--size",
            "2500",
            "https://example.com/file.bin",
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_merge_defaults() {
        let cli = Cli::try_parse_from(["partfetch", "merge"]).unwrap();
        match cli.command {
            Commands::Merge {
                output,
                pattern,
                delete,
                fallback_all,
            } => {
                assert!(output.is_none());
                assert_eq!(pattern, "*.part");
                assert!(!delete);
                assert!(!fallback_all);
            }
            _ => panic!("expected merge command"),
        }
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let result = Cli::try_parse_from([
            "partfetch",
            "download",
            "-c",
            "big",
            "https://example.com/file.bin",
        ]);
        assert!(result.is_err());
    }
}
