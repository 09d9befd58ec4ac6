//! Download loop: list, fetch, persist, optionally delete, report
//!
//! Messages are handled one at a time in listing order. A failure anywhere
//! in the handling of one message is logged with the message id, counted in
//! `errors`, and the loop moves on. Only a listing failure ends the run early.

use futures::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::MailApi;
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::MessageFetcher;
use crate::models::{MessageDetail, MessageSummary, Part, PartBody};
use crate::rate_limiter::RateLimiter;
use crate::retry::BackoffExecutor;
use crate::scanner::{ListOptions, MessageLister};
use crate::stats::{DownloadStats, StatsAggregator};
use crate::storage::MessageStore;

/// Called synchronously after every downloaded message
pub type ProgressCallback = Arc<dyn Fn(&DownloadStats) + Send + Sync>;

/// Per-message behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    pub include_attachments: bool,
    pub delete_after_download: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            include_attachments: true,
            delete_after_download: false,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,
    pub stats: DownloadStats,
}

pub struct Downloader {
    lister: MessageLister,
    fetcher: MessageFetcher,
    store: MessageStore,
    stats: Arc<StatsAggregator>,
    options: DownloadOptions,
}

impl Downloader {
    /// Wire a downloader from already-built parts
    ///
    /// `executor` must report into `stats` for retries to show up in the
    /// run summary.
    pub fn new(
        api: Arc<dyn MailApi>,
        executor: BackoffExecutor,
        list_options: ListOptions,
        store: MessageStore,
        options: DownloadOptions,
    ) -> Self {
        let stats = Arc::clone(executor.stats());
        Self {
            lister: MessageLister::new(Arc::clone(&api), executor.clone(), list_options),
            fetcher: MessageFetcher::new(api, executor),
            store,
            stats,
            options,
        }
    }

    pub fn from_config(api: Arc<dyn MailApi>, config: &Config) -> Self {
        let stats = Arc::new(StatsAggregator::new());
        let limiter = RateLimiter::new(config.rate_limit.requests_per_second);
        let executor = BackoffExecutor::new(limiter, config.retry_policy(), stats);
        let store = MessageStore::with_limits(
            &config.output.output_dir,
            config.output.max_subject_length,
            config.output.max_filename_length,
        );
        let options = DownloadOptions {
            include_attachments: config.download.include_attachments,
            delete_after_download: config.download.delete_after_download,
        };

        Self::new(api, executor, config.list_options(), store, options)
    }

    /// Snapshot of the counters so far
    pub fn stats(&self) -> DownloadStats {
        self.stats.snapshot()
    }

    pub fn output_dir(&self) -> &Path {
        self.store.root()
    }

    /// Archive every listed message
    ///
    /// Returns the final counters. A listing failure is counted, logged and
    /// returned as the error; counters stay readable through [`Downloader::stats`].
    pub async fn download_all(&self, progress: Option<&ProgressCallback>) -> Result<DownloadStats> {
        let options = self.lister.options();
        info!("Starting download with query: {}", options.query);
        info!("Output directory: {}", self.store.root().display());

        tokio::fs::create_dir_all(self.store.root()).await?;

        let mut messages = self.lister.messages();
        while let Some(item) = messages.next().await {
            let summary = match item {
                Ok(summary) => summary,
                Err(e) => {
                    self.stats.record_error();
                    error!("Listing messages failed: {}", e);
                    return Err(e);
                }
            };

            if let Err(e) = self.process_message(&summary, progress).await {
                self.stats.record_error();
                error!("Error processing message {}: {}", summary.id, e);
            }
        }

        let stats = self.stats.snapshot();
        info!(
            "Download complete: {} scanned, {} downloaded, {} attachments ({:.2} MB), {} errors, {} retries",
            stats.total_scanned,
            stats.downloaded,
            stats.attachments_saved,
            stats.megabytes_saved(),
            stats.errors,
            stats.retries
        );
        Ok(stats)
    }

    /// Run until the download finishes or `shutdown` resolves
    ///
    /// On shutdown the in-flight message is abandoned where it stands; its
    /// directory may be partially written.
    pub async fn run_until<F>(&self, progress: Option<&ProgressCallback>, shutdown: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = shutdown => {
                warn!("Shutdown requested, stopping download");
                Ok(RunOutcome {
                    state: RunState::Cancelled,
                    stats: self.stats.snapshot(),
                })
            }
            result = self.download_all(progress) => {
                result.map(|stats| RunOutcome {
                    state: RunState::Completed,
                    stats,
                })
            }
        }
    }

    async fn process_message(
        &self,
        summary: &MessageSummary,
        progress: Option<&ProgressCallback>,
    ) -> Result<()> {
        let detail = self.fetcher.fetch_detail(&summary.id).await?;
        self.save_message(&detail).await?;

        self.stats.record_downloaded();
        if let Some(callback) = progress {
            callback(&self.stats.snapshot());
        }

        if self.options.delete_after_download {
            self.fetcher.delete(&summary.id).await?;
        }

        Ok(())
    }

    /// Write one message and all of its parts
    async fn save_message(&self, detail: &MessageDetail) -> Result<PathBuf> {
        let dir = self.store.create_message_dir(detail).await?;

        for leaf in detail.payload.leaves() {
            let Part::Leaf {
                mime_type,
                filename,
                body,
            } = leaf
            else {
                continue;
            };

            match filename {
                Some(name) if self.options.include_attachments => {
                    self.save_attachment(&detail.id, &dir, name, body).await?;
                }
                _ => {
                    if let PartBody::Inline(data) = body {
                        self.store.write_body(&dir, mime_type, data).await?;
                    }
                }
            }
        }

        debug!("Saved message {} to {}", detail.id, dir.display());
        Ok(dir)
    }

    /// Save one attachment
    ///
    /// A failed remote fetch is counted and logged here without failing the
    /// message; a failed local write does fail it.
    async fn save_attachment(
        &self,
        message_id: &str,
        dir: &Path,
        filename: &str,
        body: &PartBody,
    ) -> Result<()> {
        let fetched;
        let data: &[u8] = match body {
            PartBody::Inline(bytes) => bytes,
            PartBody::Remote(reference) => {
                match self
                    .fetcher
                    .fetch_attachment_bytes(message_id, &reference.attachment_id)
                    .await
                {
                    Ok(bytes) => {
                        fetched = bytes;
                        &fetched
                    }
                    Err(e) => {
                        self.stats.record_error();
                        error!(
                            "Error downloading attachment {} of message {}: {}",
                            filename, message_id, e
                        );
                        return Ok(());
                    }
                }
            }
            PartBody::Empty => {
                debug!("Skipping empty attachment {} of message {}", filename, message_id);
                return Ok(());
            }
        };

        if data.is_empty() {
            debug!("Skipping empty attachment {} of message {}", filename, message_id);
            return Ok(());
        }

        self.store.write_attachment(dir, filename, data).await?;
        self.stats.record_attachment(data.len() as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GmailError;
    use crate::models::{AttachmentRef, MessagePage};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Single page mailbox with optional attachment failure
    struct OnePageApi {
        details: Vec<MessageDetail>,
        attachment: Result<Vec<u8>>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailApi for OnePageApi {
        async fn list_messages(
            &self,
            _query: &str,
            _page_size: u32,
            _page_token: Option<String>,
        ) -> Result<MessagePage> {
            Ok(MessagePage {
                messages: self
                    .details
                    .iter()
                    .map(|d| MessageSummary::new(d.id.clone()))
                    .collect(),
                next_page_token: None,
            })
        }

        async fn get_message(&self, id: &str) -> Result<MessageDetail> {
            self.details
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| GmailError::NotFound(id.to_string()))
        }

        async fn get_attachment(&self, _message_id: &str, _attachment_id: &str) -> Result<Vec<u8>> {
            match &self.attachment {
                Ok(bytes) => Ok(bytes.clone()),
                Err(_) => Err(GmailError::NotFound("attachment".to_string())),
            }
        }

        async fn delete_message(&self, id: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn message_with_parts(id: &str) -> MessageDetail {
        let mut headers = HashMap::new();
        headers.insert("Subject".to_string(), "Invoice".to_string());
        headers.insert("Date".to_string(), "Tue, 14 Nov 2023 09:30:05 +0000".to_string());

        MessageDetail {
            id: id.to_string(),
            thread_id: None,
            headers,
            label_ids: Vec::new(),
            snippet: String::new(),
            payload: Part::Container {
                mime_type: "multipart/mixed".to_string(),
                children: vec![
                    Part::Leaf {
                        mime_type: "text/plain".to_string(),
                        filename: None,
                        body: PartBody::Inline(b"Please find attached".to_vec()),
                    },
                    Part::Leaf {
                        mime_type: "text/html".to_string(),
                        filename: None,
                        body: PartBody::Inline(b"<p>Please find attached</p>".to_vec()),
                    },
                    Part::Leaf {
                        mime_type: "application/pdf".to_string(),
                        filename: Some("invoice.pdf".to_string()),
                        body: PartBody::Remote(AttachmentRef {
                            attachment_id: "att-1".to_string(),
                            declared_size: 4096,
                        }),
                    },
                    Part::Leaf {
                        mime_type: "text/csv".to_string(),
                        filename: Some("invoice.pdf".to_string()),
                        body: PartBody::Inline(b"a,b,c".to_vec()),
                    },
                ],
            },
        }
    }

    fn downloader(api: OnePageApi, temp: &TempDir, options: DownloadOptions) -> Downloader {
        let executor = BackoffExecutor::new(
            RateLimiter::unlimited(),
            RetryPolicy::new(1, Duration::from_millis(1)),
            Arc::new(StatsAggregator::new()),
        );
        Downloader::new(
            Arc::new(api),
            executor,
            ListOptions::default(),
            MessageStore::new(temp.path()),
            options,
        )
    }

    fn message_dir(temp: &TempDir) -> PathBuf {
        temp.path()
            .join("2023")
            .join("11")
            .join("14")
            .join("093005_Invoice_msg-0001")
    }

    #[tokio::test]
    async fn test_saves_bodies_and_attachments() {
        let temp = TempDir::new().unwrap();
        let api = OnePageApi {
            details: vec![message_with_parts("msg-0001")],
            attachment: Ok(vec![7u8; 100]),
            deleted: Mutex::new(Vec::new()),
        };
        let downloader = downloader(api, &temp, DownloadOptions::default());

        let stats = downloader.download_all(None).await.unwrap();
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.attachments_saved, 2);
        // Actual bytes written, not the declared size
        assert_eq!(stats.bytes_saved, 105);
        assert_eq!(stats.errors, 0);

        let dir = message_dir(&temp);
        assert!(dir.join("metadata.json").exists());
        assert!(dir.join("body.txt").exists());
        assert!(dir.join("body.html").exists());
        assert!(dir.join("attachments").join("invoice.pdf").exists());
        assert!(dir.join("attachments").join("invoice_1.pdf").exists());
    }

    #[tokio::test]
    async fn test_attachment_failure_keeps_message() {
        let temp = TempDir::new().unwrap();
        let api = OnePageApi {
            details: vec![message_with_parts("msg-0001")],
            attachment: Err(GmailError::NotFound("gone".to_string())),
            deleted: Mutex::new(Vec::new()),
        };
        let downloader = downloader(api, &temp, DownloadOptions::default());

        let stats = downloader.download_all(None).await.unwrap();
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.attachments_saved, 1);
        assert!(message_dir(&temp).join("body.txt").exists());
    }

    #[tokio::test]
    async fn test_attachments_disabled() {
        let temp = TempDir::new().unwrap();
        let api = OnePageApi {
            details: vec![message_with_parts("msg-0001")],
            attachment: Ok(vec![1]),
            deleted: Mutex::new(Vec::new()),
        };
        let options = DownloadOptions {
            include_attachments: false,
            ..Default::default()
        };
        let downloader = downloader(api, &temp, options);

        let stats = downloader.download_all(None).await.unwrap();
        assert_eq!(stats.attachments_saved, 0);
        assert!(!message_dir(&temp).join("attachments").exists());
    }

    #[tokio::test]
    async fn test_delete_after_download_and_progress() {
        let temp = TempDir::new().unwrap();
        let api = Arc::new(OnePageApi {
            details: vec![message_with_parts("msg-0001"), message_with_parts("msg-0002")],
            attachment: Ok(vec![1, 2]),
            deleted: Mutex::new(Vec::new()),
        });
        let executor = BackoffExecutor::new(
            RateLimiter::unlimited(),
            RetryPolicy::default(),
            Arc::new(StatsAggregator::new()),
        );
        let downloader = Downloader::new(
            api.clone(),
            executor,
            ListOptions::default(),
            MessageStore::new(temp.path()),
            DownloadOptions {
                include_attachments: true,
                delete_after_download: true,
            },
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |stats: &DownloadStats| {
            seen_in_callback.lock().unwrap().push(stats.downloaded);
        });

        downloader.download_all(Some(&callback)).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(
            *api.deleted.lock().unwrap(),
            vec!["msg-0001".to_string(), "msg-0002".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let temp = TempDir::new().unwrap();
        let api = OnePageApi {
            details: vec![message_with_parts("msg-0001")],
            attachment: Ok(vec![1]),
            deleted: Mutex::new(Vec::new()),
        };
        let downloader = downloader(api, &temp, DownloadOptions::default());

        let outcome = downloader
            .run_until(None, std::future::ready(()))
            .await
            .unwrap();
        assert_eq!(outcome.state, RunState::Cancelled);
        assert_eq!(outcome.stats.downloaded, 0);
    }

    #[tokio::test]
    async fn test_run_until_completes() {
        let temp = TempDir::new().unwrap();
        let api = OnePageApi {
            details: vec![message_with_parts("msg-0001")],
            attachment: Ok(vec![1]),
            deleted: Mutex::new(Vec::new()),
        };
        let downloader = downloader(api, &temp, DownloadOptions::default());

        let outcome = downloader
            .run_until(None, std::future::pending())
            .await
            .unwrap();
        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(outcome.stats.downloaded, 1);
    }
}
