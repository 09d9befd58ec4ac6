//! Gmail Archiver
//!
//! Downloads Gmail messages matching a search query into a dated directory
//! tree on local disk, with bodies, attachments and a `metadata.json` per
//! message. Optionally deletes each message from Gmail once it is saved.
//!
//! # Overview
//!
//! Every API call passes through a [`RateLimiter`] and a
//! [`BackoffExecutor`], which retries 429/500/503 responses with jittered
//! exponential backoff. [`MessageLister`] pages through the search results,
//! [`MessageFetcher`] pulls full messages and attachments, and
//! [`Downloader`] ties them together, counting everything in a shared
//! [`StatsAggregator`] that the dashboard and status file read from. When
//! enabled, a completed run is packed into an AES-256 zip by [`Archiver`].
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_archiver::{auth, client::GmailApi, config::Config, Downloader};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let options = auth::AuthOptions::default();
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-archiver/token.json".as_ref(),
//!         &options,
//!     )
//!     .await?;
//!
//!     let api = Arc::new(GmailApi::new(hub, auth::scopes_for(false)));
//!     let downloader = Downloader::from_config(api, &config);
//!     let stats = downloader.download_all(None).await?;
//!     println!("{} messages saved", stats.downloaded);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`archiver`] - Encrypted zip of the output tree
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - `MailApi` trait and the Gmail implementation
//! - [`cli`] - Command-line interface and run presentation
//! - [`config`] - Configuration management
//! - [`dashboard`] - Live terminal view
//! - [`downloader`] - The list/fetch/save/delete loop
//! - [`error`] - Error types and result aliases
//! - [`fetcher`] - Per-message remote operations
//! - [`models`] - Message and part data structures
//! - [`rate_limiter`] - Minimum-spacing rate limiter
//! - [`retry`] - Retry policy and backoff executor
//! - [`scanner`] - Paginated message listing
//! - [`stats`] - Run counters
//! - [`status`] - Status file for headless runs
//! - [`storage`] - On-disk layout and filename sanitizing

pub mod archiver;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod rate_limiter;
pub mod retry;
pub mod scanner;
pub mod stats;
pub mod status;
pub mod storage;

// Re-export commonly used types for convenience
pub use error::{GmailError, Result};

pub use models::{AttachmentRef, MessageDetail, MessagePage, MessageRecord, MessageSummary, Part, PartBody};

pub use archiver::{ArchiveSummary, Archiver};
pub use client::{GmailApi, MailApi};
pub use config::{ArchiveConfig, ArchiveFormat, Config};
pub use downloader::{DownloadOptions, Downloader, ProgressCallback, RunOutcome, RunState};
pub use fetcher::MessageFetcher;
pub use rate_limiter::RateLimiter;
pub use retry::{BackoffExecutor, RetryPolicy};
pub use scanner::{ListOptions, MessageLister};
pub use stats::{DownloadStats, StatsAggregator};
pub use status::{RunStatus, StatusReport, StatusWriter};
pub use storage::{sanitize_filename, MessageStore};

pub use cli::{Cli, Commands};
