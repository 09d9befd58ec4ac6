//! Per-message remote operations routed through the backoff executor

use crate::client::MailApi;
use crate::error::Result;
use crate::models::MessageDetail;
use crate::retry::BackoffExecutor;
use std::sync::Arc;
use tracing::debug;

/// Fetches message content and deletes messages
///
/// Every method returns the failure left after retries. Callers decide
/// whether it is fatal; the download loop never treats it as such.
pub struct MessageFetcher {
    api: Arc<dyn MailApi>,
    executor: BackoffExecutor,
}

impl MessageFetcher {
    pub fn new(api: Arc<dyn MailApi>, executor: BackoffExecutor) -> Self {
        Self { api, executor }
    }

    pub async fn fetch_detail(&self, id: &str) -> Result<MessageDetail> {
        let label = format!("get message {}", id);
        self.executor
            .execute(&label, || self.api.get_message(id))
            .await
    }

    pub async fn fetch_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let label = format!("get attachment of {}", message_id);
        let bytes = self
            .executor
            .execute(&label, || self.api.get_attachment(message_id, attachment_id))
            .await?;
        debug!("Attachment {} of {}: {} bytes", attachment_id, message_id, bytes.len());
        Ok(bytes)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let label = format!("delete message {}", id);
        self.executor
            .execute(&label, || self.api.delete_message(id))
            .await?;
        debug!("Deleted message {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GmailError;
    use crate::models::{MessagePage, Part, PartBody};
    use crate::rate_limiter::RateLimiter;
    use crate::retry::RetryPolicy;
    use crate::stats::StatsAggregator;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls of every operation with a 503
    struct FlakyApi {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyApi {
        fn check(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(GmailError::ServerError {
                    status: 503,
                    message: "Service unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MailApi for FlakyApi {
        async fn list_messages(
            &self,
            _query: &str,
            _page_size: u32,
            _page_token: Option<String>,
        ) -> Result<MessagePage> {
            self.check()?;
            Ok(MessagePage::default())
        }

        async fn get_message(&self, id: &str) -> Result<MessageDetail> {
            self.check()?;
            Ok(MessageDetail {
                id: id.to_string(),
                thread_id: None,
                headers: HashMap::new(),
                label_ids: Vec::new(),
                snippet: String::new(),
                payload: Part::Leaf {
                    mime_type: "text/plain".to_string(),
                    filename: None,
                    body: PartBody::Empty,
                },
            })
        }

        async fn get_attachment(&self, _message_id: &str, _attachment_id: &str) -> Result<Vec<u8>> {
            self.check()?;
            Ok(vec![1, 2, 3])
        }

        async fn delete_message(&self, _id: &str) -> Result<()> {
            self.check()
        }
    }

    fn fetcher(failures: u32, max_retries: u32) -> (MessageFetcher, Arc<FlakyApi>, Arc<StatsAggregator>) {
        let api = Arc::new(FlakyApi {
            failures,
            calls: AtomicU32::new(0),
        });
        let stats = Arc::new(StatsAggregator::new());
        let executor = BackoffExecutor::new(
            RateLimiter::unlimited(),
            RetryPolicy::new(max_retries, Duration::from_millis(100)),
            Arc::clone(&stats),
        );
        let dyn_api: Arc<dyn MailApi> = api.clone();
        (MessageFetcher::new(dyn_api, executor), api, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_detail_retries_transient() {
        let (fetcher, api, stats) = fetcher(2, 3);

        let detail = fetcher.fetch_detail("abc").await.unwrap();
        assert_eq!(detail.id, "abc");
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachment_bytes() {
        let (fetcher, _, _) = fetcher(0, 3);
        let bytes = fetcher.fetch_attachment_bytes("abc", "att1").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_surfaces_exhausted_retries() {
        let (fetcher, api, _) = fetcher(10, 2);

        let err = fetcher.delete("abc").await.unwrap_err();
        assert!(matches!(err, GmailError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }
}
