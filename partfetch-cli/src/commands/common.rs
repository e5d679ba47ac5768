//! Helpers shared across CLI commands.
//!
//! Settings resolve in order: command line flag, config file, built-in
//! default (already folded into [`ConfigFile::default`]).

use std::path::PathBuf;

use partfetch::config::{parse_size, ConfigFile};
use partfetch::hooks::{HookCommand, HookConfig};
use partfetch::logging::{self, WorkerGuard};

use crate::error::CliError;

/// Clap value parser for size arguments such as `50M`.
pub fn parse_size_arg(value: &str) -> Result<u64, String> {
    match parse_size(value) {
        Ok(0) => Err("size must be greater than zero".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(e.to_string()),
    }
}

/// Load the config file and install logging.
///
/// The returned guard keeps the file writer alive; hold it until exit.
pub fn init(cli_log_level: Option<String>) -> Result<(ConfigFile, Option<WorkerGuard>), CliError> {
    let config = ConfigFile::load()?;
    let level = cli_log_level.unwrap_or_else(|| config.logging.level.clone());
    let guard = logging::init(&level, config.logging.directory.as_deref())?;
    Ok((config, guard))
}

/// Resolve the chunk size.
pub fn resolve_chunk_size(cli: Option<u64>, config: &ConfigFile) -> u64 {
    cli.unwrap_or(config.download.chunk_size)
}

/// Resolve the number of concurrent chunk downloads.
pub fn resolve_jobs(cli: Option<usize>, config: &ConfigFile) -> Result<usize, CliError> {
    match cli {
        Some(0) => Err(CliError::Config(
            "--jobs must be at least 1".to_string(),
        )),
        Some(jobs) => Ok(jobs),
        None => Ok(config.download.jobs),
    }
}

/// Resolve the per-chunk retry count.
pub fn resolve_retries(cli: Option<u32>, config: &ConfigFile) -> u32 {
    cli.unwrap_or(config.download.retries)
}

/// Resolve the proxy URL. An empty flag disables a configured proxy.
pub fn resolve_proxy(cli: Option<String>, config: &ConfigFile) -> Option<String> {
    match cli {
        Some(proxy) if proxy.is_empty() => None,
        Some(proxy) => Some(proxy),
        None => config.download.proxy.clone(),
    }
}

/// Resolve the output directory, defaulting to the working directory.
pub fn resolve_output_dir(cli: Option<PathBuf>, config: &ConfigFile) -> PathBuf {
    cli.or_else(|| config.download.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve the post-part hook. No command on either side means no hook.
pub fn resolve_hook(
    cli_command: Option<String>,
    cli_jobs: Option<usize>,
    config: &ConfigFile,
) -> Option<HookConfig> {
    let command = cli_command.or_else(|| config.hooks.command.clone())?;
    let command = HookCommand::new(command)?;
    Some(HookConfig {
        command,
        concurrency: cli_jobs.unwrap_or(config.hooks.jobs),
    })
}
