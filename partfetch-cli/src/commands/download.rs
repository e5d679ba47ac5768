//! Download command.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use partfetch::config::format_size;
use partfetch::download::{DownloadOutcome, DownloadReport, DownloadRequest, Downloader};
use partfetch::transport::ReqwestTransport;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::common::{
    init, resolve_chunk_size, resolve_hook, resolve_jobs, resolve_output_dir, resolve_proxy,
    resolve_retries,
};
use crate::error::CliError;
use crate::progress::DownloadProgress;

/// Arguments for the download command.
pub struct DownloadArgs {
    pub url: String,
    pub chunk_size: Option<u64>,
    pub proxy: Option<String>,
    pub retries: Option<u32>,
    pub no_head: bool,
    pub size: Option<u64>,
    pub jobs: Option<usize>,
    pub force: bool,
    pub merge: bool,
    pub post_part: Option<String>,
    pub post_part_jobs: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub no_progress: bool,
}

/// Run the download command.
pub fn run(args: DownloadArgs, log_level: Option<String>) -> Result<(), CliError> {
    if args.no_head && args.size.is_none() {
        return Err(CliError::Config("--no-head requires --size".to_string()));
    }

    let (config, _log_guard) = init(log_level)?;

    let mut transport_config = config.download.transport();
    transport_config.proxy = resolve_proxy(args.proxy, &config);
    let transport = Arc::new(ReqwestTransport::new(&transport_config)?);

    let mut request = DownloadRequest::new(args.url);
    request.chunk_size = resolve_chunk_size(args.chunk_size, &config);
    request.concurrency = resolve_jobs(args.jobs, &config)?;
    request.max_retries = resolve_retries(args.retries, &config);
    request.force_restart = args.force;
    request.total_size = args.size;
    request.hook = resolve_hook(args.post_part, args.post_part_jobs, &config);
    request.output_dir = resolve_output_dir(args.output_dir, &config);
    request.merge_after = args.merge;

    println!(
        "{} {}",
        style("Downloading").bold(),
        style(&request.url).cyan()
    );
    println!(
        "  Chunk size: {}  Jobs: {}  Retries: {}",
        format_size(request.chunk_size),
        request.concurrency,
        request.max_retries
    );
    if let Some(proxy) = &transport_config.proxy {
        println!("  Proxy:      {}", proxy);
    }
    if let Some(hook) = &request.hook {
        println!(
            "  Post-part:  {} ({} workers)",
            hook.command.template(),
            hook.workers()
        );
    }
    println!("  Output:     {}", request.output_dir.display());
    println!();

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt signal, stopping...");
        handler_token.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let progress = DownloadProgress::new(!args.no_progress);
    let downloader = Downloader::new(transport).with_progress(progress.callback());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let result = runtime.block_on(downloader.download(&request, &cancel));

    match result {
        Ok(DownloadOutcome::Completed(report)) => {
            progress.finish();
            print_report(&report);
            Ok(())
        }
        Ok(DownloadOutcome::Interrupted {
            completed_chunks,
            total_chunks,
        }) => {
            progress.clear();
            println!(
                "{} {}/{} chunks complete. Run the same command again to resume.",
                style("Download interrupted.").yellow().bold(),
                completed_chunks,
                total_chunks
            );
            Ok(())
        }
        Err(e) => {
            progress.clear();
            debug!(error = ?e, "Download failed");
            Err(e.into())
        }
    }
}

fn print_report(report: &DownloadReport) {
    println!();
    println!(
        "{} {} ({}, {} chunks)",
        style("Download complete:").green().bold(),
        report.prefix,
        format_size(report.total_size),
        report.chunks
    );

    let transfer = &report.transfer;
    if transfer.skipped > 0 {
        println!(
            "  Fetched {} chunks, {} already on disk",
            transfer.fetched, transfer.skipped
        );
    }

    if let Some(hooks) = &report.hooks {
        println!(
            "  Post-part: {} succeeded, {} failed",
            hooks.succeeded, hooks.failed
        );
    }
    if report.state_retained {
        println!(
            "  {} some post-part commands failed; rerun to retry them",
            style("Note:").yellow()
        );
    }

    if let Some(merged) = &report.merged {
        for group in &merged.groups {
            if group.result.is_ok() {
                println!(
                    "  Merged {} parts into {}",
                    group.parts,
                    group.output.display()
                );
            }
        }
    }
}
