use anyhow::Result;
use clap::Parser;
use gmail_archiver::auth::{self, AuthOptions};
use gmail_archiver::cli::{self, Cli, Commands};
use gmail_archiver::client::GmailApi;
use gmail_archiver::config::Config;
use gmail_archiver::downloader::RunState;
use gmail_archiver::error::GmailError;
use gmail_archiver::status::StatusReport;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Exit code for a command stopped by Ctrl+C or SIGTERM
const EXIT_CANCELLED: i32 = 130;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: MultiProgress,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: MultiProgress,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(self.multi.clone())
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nFor help, run: gmail-archiver --help");
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool, multi: &MultiProgress) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_archiver=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_archiver=info,warn"))
    };

    // MultiProgress drops println output when stderr is not a terminal
    let writer = if multi.is_hidden() {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(MultiProgressMakeWriter {
            multi: multi.clone(),
        })
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

async fn run() -> Result<i32> {
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let multi = MultiProgress::new();
    init_tracing(cli.verbose, &multi);

    match &cli.command {
        Commands::Auth {
            force,
            no_browser,
            allow_delete,
        } => {
            tracing::info!("Authenticating with Gmail API...");

            if *force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let options = AuthOptions {
                no_browser: *no_browser,
                allow_delete: *allow_delete,
            };
            let shutdown = cli::shutdown_signal();
            tokio::pin!(shutdown);

            let authenticate = async {
                let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache, &options).await?;
                let api = GmailApi::new(hub, auth::scopes_for(options.allow_delete));
                api.account_email().await
            };
            let Some(account) = cli::unless_shutdown(authenticate, shutdown.as_mut()).await? else {
                return Ok(EXIT_CANCELLED);
            };

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);
            println!("Connected to account: {}", account);
            Ok(0)
        }

        Commands::Run(args) => {
            tracing::info!("Starting download run");
            let outcome = cli::run_download(&cli, args, &multi).await?;
            match outcome.state {
                RunState::Completed => Ok(0),
                RunState::Cancelled => Ok(EXIT_CANCELLED),
            }
        }

        Commands::Status {
            status_file,
            detailed,
        } => {
            if !status_file.exists() {
                println!("No status file at {:?}; start a run with --headless", status_file);
                return Ok(0);
            }

            let report = StatusReport::load(status_file).await?;
            for line in cli::format_status_report(&report, *detailed) {
                println!("{}", line);
            }
            Ok(0)
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(GmailError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - download.query: Gmail search selecting what to archive");
            println!("  - download.delete_after_download: permanently delete after saving");
            println!("  - rate_limit.requests_per_second: 0 disables rate limiting");
            println!("  - output.output_dir: root of the archive tree");
            Ok(0)
        }
    }
}
