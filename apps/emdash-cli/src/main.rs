//! EMDash command-line client entry point.

mod adapter;
mod app;
mod config;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use globset::Glob;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "emdash", version, about = "Move files between disk and an EMDash database")]
struct Cli {
    /// Database URL, overrides the configuration file.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Concurrent transfers.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Print the run report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download the binaries attached to records and their descendants.
    Download(DownloadArgs),
    /// Upload files to a record.
    Upload(UploadArgs),
    /// Upload files as they appear in a directory.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// Relation levels to follow below each record; negative (the
    /// default) follows the whole subtree, 0 only the named records.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    recurse: i32,

    /// Replace files that already exist.
    #[arg(long)]
    overwrite: bool,

    /// Name files after the binary instead of the original filename.
    #[arg(long)]
    rename: bool,

    /// Keep gzip-compressed binaries compressed.
    #[arg(long)]
    nogzip: bool,

    /// Destination directory.
    #[arg(long, default_value = ".")]
    dest: PathBuf,

    /// Record names.
    #[arg(required = true)]
    names: Vec<String>,
}

#[derive(Debug, Args)]
struct UploadOptions {
    /// Upload handler: file, csv or record.
    #[arg(long, default_value = "file")]
    handler: String,

    /// Record type for handlers that create a new record.
    #[arg(long)]
    rectype: Option<String>,

    /// Extra record field, repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Form field the file is sent under.
    #[arg(long, value_name = "NAME")]
    file_param: Option<String>,
}

#[derive(Debug, Args)]
struct UploadArgs {
    #[command(flatten)]
    options: UploadOptions,

    /// Target record.
    target: String,

    /// Files to upload.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[command(flatten)]
    options: UploadOptions,

    /// Only files whose name matches this glob.
    #[arg(long, default_value = "*")]
    pattern: Glob,

    /// Seconds a file must stay unchanged before it is uploaded.
    #[arg(long, default_value_t = 2)]
    settle: u64,

    /// Target record.
    target: String,

    /// Directory to watch.
    dir: PathBuf,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = config::Config::load()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    tracing::debug!(host = %config.host, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, cli.command, cli.json))
}
