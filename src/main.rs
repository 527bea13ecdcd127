//! hf-cache-fetch - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hf_cache_fetch::models::{list_cached_repos, repo_cache_size};
use hf_cache_fetch::{
    CancellationToken, DownloadResult, Downloader, FetchConfig, ProgressEvent, ProgressSink,
    metrics,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit status for an interrupted download (128 + SIGINT)
const EXIT_CANCELLED: u8 = 130;

const PB_STYLE: &str =
    "[{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

#[derive(Parser, Debug)]
#[command(name = "hf-cache-fetch")]
#[command(about = "Download hub files into the local model cache", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: String,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a file (all shards when the name is a shard)
    Download {
        /// Repository id, e.g. Qwen/Qwen2.5-0.5B-Instruct-GGUF
        repo_id: String,

        /// File path inside the repository
        filename: String,

        /// Override the cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Download even when the blob is already cached
        #[arg(short, long)]
        force: bool,

        /// Branch to resolve against
        #[arg(long)]
        revision: Option<String>,
    },

    /// List cached repositories
    List {
        /// Override the cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

/// Renders progress events on stderr
struct BarSink {
    pb: ProgressBar,
}

impl BarSink {
    fn new() -> Self {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(PB_STYLE) {
            pb.set_style(style.progress_chars("#>-"));
        }
        Self { pb }
    }
}

impl ProgressSink for BarSink {
    fn on_progress(&mut self, event: &ProgressEvent) {
        if let Some(total) = event.total {
            self.pb.set_length(total);
        }
        self.pb.set_position(event.downloaded());
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let prometheus_handle = if cli.print_metrics {
        Some(metrics::setup_metrics()?)
    } else {
        None
    };

    let mut config = FetchConfig::load(cli.config)?;

    let code = match cli.command {
        Command::Download {
            repo_id,
            filename,
            cache_dir,
            force,
            revision,
        } => {
            if let Some(cache_dir) = cache_dir {
                config.cache_dir = hf_cache_fetch::models::cache::expand_home(&cache_dir);
            }
            if let Some(revision) = revision {
                config.revision = revision;
            }
            config.validate()?;

            tracing::debug!(
                endpoint = %config.endpoint,
                cache_dir = ?config.cache_dir,
                revision = %config.revision,
                "Configuration loaded"
            );

            download(config, &repo_id, &filename, force).await?
        }
        Command::List { cache_dir } => {
            let cache_dir = cache_dir
                .map(|dir| hf_cache_fetch::models::cache::expand_home(&dir))
                .unwrap_or(config.cache_dir);
            for repo_id in list_cached_repos(&cache_dir) {
                let size = repo_cache_size(&cache_dir, &repo_id).unwrap_or(0);
                println!("{}\t{}", repo_id, size);
            }
            ExitCode::SUCCESS
        }
    };

    if let Some(handle) = prometheus_handle {
        eprintln!("{}", handle.render());
    }

    Ok(code)
}

async fn download(
    config: FetchConfig,
    repo_id: &str,
    filename: &str,
    force: bool,
) -> Result<ExitCode> {
    let downloader = Downloader::new(config).context("Failed to create downloader")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C signal, stopping download");
                    cancel.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "Failed to install Ctrl+C handler"),
            }
        }
    });

    let mut sink = BarSink::new();
    let result = downloader
        .download_with_shards(repo_id, filename, force, &cancel, &mut sink)
        .await;
    sink.pb.finish_and_clear();

    let outcome = DownloadResult::from(&result);
    if outcome.success {
        println!("{}", outcome.path.display());
        Ok(ExitCode::SUCCESS)
    } else if outcome.cancelled {
        tracing::info!(partial = ?outcome.path, "Download interrupted, rerun to resume");
        Ok(ExitCode::from(EXIT_CANCELLED))
    } else {
        tracing::error!(
            reason = outcome.reason.as_deref().unwrap_or("unknown"),
            "Download failed"
        );
        Ok(ExitCode::FAILURE)
    }
}
