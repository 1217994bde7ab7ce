//! Get command - download one URL with concurrent range requests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use console::style;

use fydownloader::checksum::verify_checksum;
use fydownloader::config::ConfigFile;
use fydownloader::progress::ProgressReporter;
use fydownloader::{ChunkProgress, Downloader, DownloaderConfig, SinkStrategy};

use crate::error::CliError;
use crate::ui::ChunkBars;

/// Sink strategy selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SinkArg {
    /// Positioned writes straight into the output file
    Direct,
    /// One temp file per chunk, assembled at the end
    Temp,
}

impl From<SinkArg> for SinkStrategy {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Direct => SinkStrategy::Direct,
            SinkArg::Temp => SinkStrategy::TempFiles,
        }
    }
}

/// Arguments for the get command.
#[derive(Debug, Clone, Default)]
pub struct GetArgs {
    pub url: String,
    pub workers: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub sink: Option<SinkArg>,
    pub timeout: Option<u64>,
    pub sha256: Option<String>,
    pub no_progress: bool,
}

/// Merge CLI flags over config-file settings.
///
/// Returns the runtime config and the worker count.
pub fn resolve(args: &GetArgs, file: &ConfigFile) -> Result<(DownloaderConfig, usize), CliError> {
    let workers = args.workers.unwrap_or(file.download.workers);
    if workers == 0 {
        return Err(CliError::Config("--workers must be at least 1".to_string()));
    }

    let mut config = file.to_downloader_config();
    if let Some(dir) = &args.output_dir {
        config = config.with_destination_dir(dir.clone());
    }
    if let Some(sink) = args.sink {
        config = config.with_sink(sink.into());
    }
    match args.timeout {
        Some(0) => config.request_timeout = None,
        Some(secs) => config = config.with_request_timeout(Duration::from_secs(secs)),
        None => {}
    }
    Ok((config, workers))
}

/// Run the get command.
pub fn run(args: GetArgs, file: &ConfigFile) -> Result<(), CliError> {
    let (config, workers) = resolve(&args, file)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(download(args, config, workers))
}

async fn download(args: GetArgs, config: DownloaderConfig, workers: usize) -> Result<(), CliError> {
    let downloader = Downloader::new(config)?;
    tracing::info!(url = %args.url, workers, sink = %downloader.config().sink, "Starting download");

    let session = downloader.start(&args.url, workers);
    let handle = session.handle();

    let cancel_handle = handle.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, cancelling download...");
        cancel_handle.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let visible = !args.no_progress && console::Term::stderr().is_term();
    let bars = Arc::new(ChunkBars::new(handle.clone(), visible));
    let reporter_bars = Arc::clone(&bars);
    let reporter = ProgressReporter::start_default(
        handle,
        Box::new(move |progress: &[ChunkProgress]| reporter_bars.update(progress)),
    );

    let outcome = session.wait().await;
    reporter.finish().await;
    bars.finish(outcome.is_ok());

    let path = outcome?;
    println!("{} {}", style("Saved").green().bold(), path.display());

    if let Some(expected) = args.sha256 {
        let check_path = path.clone();
        let digest = tokio::task::spawn_blocking(move || verify_checksum(&check_path, &expected))
            .await
            .map_err(std::io::Error::other)??;
        println!("{} sha256 {}", style("Verified").green().bold(), digest);
    }
    Ok(())
}
