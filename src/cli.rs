//! Command-line interface

use clap::{Args, Parser, Subcommand};
use indicatif::MultiProgress;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::archiver::Archiver;
use crate::auth::{self, AuthOptions};
use crate::client::{GmailApi, MailApi};
use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::downloader::{Downloader, ProgressCallback, RunOutcome, RunState};
use crate::error::{GmailError, Result};
use crate::stats::DownloadStats;
use crate::status::{self, RunStatus, StatusConfig, StatusReport, StatusWriter, DEFAULT_STATUS_FILE};

#[derive(Parser, Debug)]
#[command(name = "gmail-archiver")]
#[command(version)]
#[command(about = "Download Gmail messages and attachments into a local archive", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-archiver/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,

        /// Paste the authorization code instead of opening a browser
        #[arg(long)]
        no_browser: bool,

        /// Also request the scope needed for delete-after-download
        #[arg(long)]
        allow_delete: bool,
    },

    /// Download messages matching the query
    Run(RunArgs),

    /// Show the status file of the current or last headless run
    Status {
        #[arg(long, default_value = DEFAULT_STATUS_FILE)]
        status_file: PathBuf,

        /// Show every counter
        #[arg(long)]
        detailed: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Options of the `run` command; every setting overrides the config file
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Live terminal dashboard
    #[arg(long, conflicts_with = "headless")]
    pub dash: bool,

    /// No terminal output; progress goes to the status file
    #[arg(long)]
    pub headless: bool,

    /// Status file written in headless mode
    #[arg(long, default_value = DEFAULT_STATUS_FILE)]
    pub status_file: PathBuf,

    /// Paste the authorization code instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Gmail search query
    #[arg(short, long, env = "GMAIL_QUERY")]
    pub query: Option<String>,

    /// Stop after this many messages (0 = no limit)
    #[arg(long, env = "MAX_RESULTS")]
    pub max_results: Option<u32>,

    /// Save attachments
    #[arg(
        long,
        env = "INCLUDE_ATTACHMENTS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub include_attachments: Option<bool>,

    /// Skip attachments (same as --include-attachments=false)
    #[arg(long, conflicts_with = "include_attachments")]
    pub no_attachments: bool,

    /// Permanently delete each message after saving it
    #[arg(
        long,
        env = "DELETE_AFTER_DOWNLOAD",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub delete_after_download: Option<bool>,

    /// Maximum API requests per second (0 = unlimited)
    #[arg(long, env = "REQUESTS_PER_SECOND")]
    pub requests_per_second: Option<f64>,

    /// Retries per API call on transient failures
    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Root of the archive tree
    #[arg(short, long, env = "OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Zip the output directory after a completed run
    #[arg(
        long,
        env = "ARCHIVE_ENABLED",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub archive: Option<bool>,

    /// Password for AES-256 archive encryption
    #[arg(long, env = "ARCHIVE_PASSWORD", hide_env_values = true)]
    pub archive_password: Option<String>,

    /// File holding the archive password
    #[arg(long, env = "ARCHIVE_PASSWORD_FILE")]
    pub archive_password_file: Option<PathBuf>,
}

impl RunArgs {
    /// Overlay command-line and environment settings onto `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(query) = &self.query {
            config.download.query = query.clone();
        }
        if let Some(max_results) = self.max_results {
            config.download.max_results = (max_results > 0).then_some(max_results);
        }
        if let Some(include) = self.include_attachments {
            config.download.include_attachments = include;
        }
        if self.no_attachments {
            config.download.include_attachments = false;
        }
        if let Some(delete) = self.delete_after_download {
            config.download.delete_after_download = delete;
        }
        if let Some(rps) = self.requests_per_second {
            config.rate_limit.requests_per_second = rps;
        }
        if let Some(max_retries) = self.max_retries {
            config.rate_limit.max_retries = max_retries;
        }
        if let Some(output_dir) = &self.output_dir {
            config.output.output_dir = output_dir.clone();
        }
        if let Some(archive) = self.archive {
            config.archive.enabled = archive;
        }
        if let Some(password) = &self.archive_password {
            config.archive.password = Some(password.clone());
        }
        if let Some(password_file) = &self.archive_password_file {
            config.archive.password_file = Some(password_file.clone());
        }
    }

    fn mode(&self) -> OutputMode {
        if self.dash {
            OutputMode::Dashboard
        } else if self.headless {
            OutputMode::Headless
        } else {
            OutputMode::Batch
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Batch,
    Dashboard,
    Headless,
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Config file with command-line overrides applied, validated once
pub async fn load_run_config(path: &Path, args: &RunArgs) -> Result<Config> {
    let mut config = Config::load(path).await?;
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Drive `setup` unless `shutdown` resolves first; `None` means interrupted
pub async fn unless_shutdown<T, F, S>(setup: F, shutdown: Pin<&mut S>) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
    S: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = shutdown => {
            warn!("Shutdown requested before the download started");
            Ok(None)
        }
        result = setup => result.map(Some),
    }
}

/// Load config, authenticate and run the download with the chosen presentation
///
/// One shutdown listener covers the whole command, so an interrupt during
/// authentication ends the run as cancelled too.
pub async fn run_download(cli: &Cli, args: &RunArgs, multi: &MultiProgress) -> Result<RunOutcome> {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let setup = async {
        let config = load_run_config(&cli.config, args).await?;

        let auth_options = AuthOptions {
            no_browser: args.no_browser,
            allow_delete: config.download.delete_after_download,
        };
        let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache, &auth_options).await?;
        info!("Gmail API authenticated");

        let api: Arc<dyn MailApi> = Arc::new(GmailApi::new(
            hub,
            auth::scopes_for(auth_options.allow_delete),
        ));
        Ok::<_, GmailError>((config, api))
    };

    let Some((config, api)) = unless_shutdown(setup, shutdown.as_mut()).await? else {
        return Ok(RunOutcome {
            state: RunState::Cancelled,
            stats: DownloadStats::default(),
        });
    };

    run_with_api(api, &config, args, multi, shutdown).await
}

/// Drive a download against any `MailApi`
pub async fn run_with_api<F>(
    api: Arc<dyn MailApi>,
    config: &Config,
    args: &RunArgs,
    multi: &MultiProgress,
    shutdown: F,
) -> Result<RunOutcome>
where
    F: std::future::Future<Output = ()>,
{
    let mode = args.mode();
    let status_config = StatusConfig::from(config);
    let downloader = Downloader::from_config(api, config);

    // A bad password file should fail before anything is downloaded
    let archive_password = if config.archive.enabled {
        config.archive.resolve_password().await?
    } else {
        None
    };

    let writer = (mode == OutputMode::Headless)
        .then(|| StatusWriter::new(&args.status_file, status_config.clone()));
    let dashboard = (mode == OutputMode::Dashboard)
        .then(|| Arc::new(Dashboard::new(multi.clone(), &status_config)));

    if let Some(writer) = &writer {
        info!("Writing status to {:?} (run {})", writer.path(), writer.run_id());
        writer.write(RunStatus::Starting, &DownloadStats::default());
    }

    let callback: ProgressCallback = {
        let writer = writer.clone();
        let dashboard = dashboard.clone();
        Arc::new(move |stats: &DownloadStats| {
            if let Some(writer) = &writer {
                writer.write(RunStatus::Running, stats);
            }
            match &dashboard {
                Some(dashboard) => dashboard.update(stats),
                None if mode == OutputMode::Batch && stats.downloaded % 100 == 0 => {
                    info!("Downloaded {} messages", stats.downloaded);
                }
                None => {}
            }
        })
    };

    let mut result = downloader.run_until(Some(&callback), shutdown).await;

    let mut archive_path = None;
    let completed = matches!(&result, Ok(outcome) if outcome.state == RunState::Completed);
    if completed && config.archive.enabled {
        let output_dir = downloader.output_dir();
        let archiver = Archiver::beside(output_dir, config.archive.format);
        match archiver.create_archive(output_dir, archive_password.as_deref()).await {
            Ok(summary) => archive_path = Some(summary.path),
            Err(e) => {
                error!("Archiving {} failed: {}", output_dir.display(), e);
                result = Err(e);
            }
        }
    }

    let (final_status, stats) = match &result {
        Ok(outcome) if outcome.state == RunState::Cancelled => (RunStatus::Cancelled, outcome.stats),
        Ok(outcome) => (RunStatus::Complete, outcome.stats),
        Err(_) => (RunStatus::Error, downloader.stats()),
    };

    if let Some(writer) = &writer {
        writer.write(final_status, &stats);
    }
    if let Some(dashboard) = &dashboard {
        dashboard.finish(final_status, &stats);
    }
    if mode != OutputMode::Headless {
        print_summary(final_status, &stats, downloader.output_dir(), archive_path.as_deref());
    } else {
        info!("Run finished with status '{}': {}", final_status, status::format_for_powerline(&stats));
    }

    result
}

/// End-of-run summary for interactive terminals
pub fn print_summary(status: RunStatus, stats: &DownloadStats, output_dir: &Path, archive: Option<&Path>) {
    println!();
    match status {
        RunStatus::Complete => println!("Download complete"),
        RunStatus::Cancelled => println!("Download cancelled"),
        _ => println!("Download stopped with an error"),
    }
    println!("  Messages scanned:   {}", stats.total_scanned);
    println!("  Messages saved:     {}", stats.downloaded);
    println!("  Attachments saved:  {}", stats.attachments_saved);
    println!("  Attachment size:    {:.2} MB", stats.megabytes_saved());
    println!("  Errors:             {}", stats.errors);
    println!("  Rate limit hits:    {}", stats.rate_limit_hits);
    println!("  Retries:            {}", stats.retries);
    println!("  Output directory:   {}", output_dir.display());
    if let Some(archive) = archive {
        println!("  Archive:            {}", archive.display());
    }
}

/// Lines printed by the `status` command
pub fn format_status_report(report: &StatusReport, detailed: bool) -> Vec<String> {
    let mut lines = vec![format!(
        "{} [{}]",
        status::format_for_powerline(&report.stats),
        report.status
    )];

    if detailed {
        let stats = &report.stats;
        lines.push(format!("Run:               {}", report.run_id));
        lines.push(format!("Updated:           {}", report.timestamp.to_rfc3339()));
        lines.push(format!("Query:             {}", report.config.query));
        lines.push(format!("Output directory:  {}", report.config.output_dir.display()));
        lines.push(format!("Scanned:           {}", stats.total_scanned));
        lines.push(format!("Downloaded:        {}", stats.downloaded));
        lines.push(format!("Attachments:       {}", stats.attachments_saved));
        lines.push(format!("Size:              {:.2} MB", stats.megabytes_saved()));
        lines.push(format!("Errors:            {}", stats.errors));
        lines.push(format!("Rate limit hits:   {}", stats.rate_limit_hits));
        lines.push(format!("Retries:           {}", stats.retries));
    }

    lines
}
