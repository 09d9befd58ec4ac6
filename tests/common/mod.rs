//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_archiver::client::MailApi;
use gmail_archiver::config::Config;
use gmail_archiver::error::{GmailError, Result};
use gmail_archiver::models::{AttachmentRef, MessageDetail, MessagePage, MessageSummary, Part, PartBody};
use mockall::mock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

mock! {
    pub MailApi {}

    #[async_trait::async_trait]
    impl MailApi for MailApi {
        async fn list_messages(
            &self,
            query: &str,
            page_size: u32,
            page_token: Option<String>,
        ) -> Result<MessagePage>;
        async fn get_message(&self, id: &str) -> Result<MessageDetail>;
        async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
        async fn delete_message(&self, id: &str) -> Result<()>;
    }
}

/// Plain-text message with a subject and a fixed date
pub fn create_test_message(id: &str, subject: &str) -> MessageDetail {
    let mut headers = HashMap::new();
    headers.insert("Subject".to_string(), subject.to_string());
    headers.insert("From".to_string(), "Alice <alice@example.com>".to_string());
    headers.insert("To".to_string(), "me@example.com".to_string());
    headers.insert("Date".to_string(), "Mon, 1 Jan 2024 10:00:00 -0800".to_string());

    MessageDetail {
        id: id.to_string(),
        thread_id: Some(format!("thread_{}", id)),
        headers,
        label_ids: vec!["INBOX".to_string()],
        snippet: format!("Snippet of {}", subject),
        payload: Part::Leaf {
            mime_type: "text/plain".to_string(),
            filename: None,
            body: PartBody::Inline(format!("Body of {}", subject).into_bytes()),
        },
    }
}

/// Message with a plain body and one remote attachment
pub fn create_message_with_attachment(id: &str, filename: &str, attachment_id: &str) -> MessageDetail {
    let mut message = create_test_message(id, "With attachment");
    message.payload = Part::Container {
        mime_type: "multipart/mixed".to_string(),
        children: vec![
            Part::Leaf {
                mime_type: "text/plain".to_string(),
                filename: None,
                body: PartBody::Inline(b"See attached".to_vec()),
            },
            Part::Leaf {
                mime_type: "application/pdf".to_string(),
                filename: Some(filename.to_string()),
                body: PartBody::Remote(AttachmentRef {
                    attachment_id: attachment_id.to_string(),
                    declared_size: 1_000_000,
                }),
            },
        ],
    };
    message
}

/// Config tuned for tests: no rate limit, fast retries, output under `root`
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.rate_limit.requests_per_second = 0.0;
    config.rate_limit.max_retries = 2;
    config.rate_limit.base_delay_ms = 1;
    config.output.output_dir = root.to_path_buf();
    config
}

/// Every `metadata.json` below `root`
pub fn find_metadata_files(root: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().is_some_and(|n| n == "metadata.json") {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// How a scripted message misbehaves
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    /// 404 on every attempt
    Permanent,
    /// 503 for the first `n` attempts, then success
    Transient(usize),
    /// 429 on every attempt
    AlwaysRateLimited,
}

/// In-memory mailbox serving scripted pages
///
/// Page tokens are page indexes. Call counts are recorded so tests can
/// assert on how many requests the downloader made.
#[derive(Default)]
pub struct FakeMailbox {
    pages: Vec<Vec<MessageDetail>>,
    attachments: HashMap<String, Vec<u8>>,
    failures: HashMap<String, Failure>,
    list_failure: Option<usize>,
    list_calls: AtomicUsize,
    get_calls: Mutex<HashMap<String, usize>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeMailbox {
    pub fn with_pages(pages: Vec<Vec<MessageDetail>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, attachment_id: &str, data: &[u8]) -> Self {
        self.attachments.insert(attachment_id.to_string(), data.to_vec());
        self
    }

    pub fn with_failure(mut self, message_id: &str, failure: Failure) -> Self {
        self.failures.insert(message_id.to_string(), failure);
        self
    }

    /// Fail the list call for page `page` with a permanent error
    pub fn with_list_failure(mut self, page: usize) -> Self {
        self.list_failure = Some(page);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self, id: &str) -> usize {
        self.get_calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailApi for FakeMailbox {
    async fn list_messages(
        &self,
        _query: &str,
        _page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);

        if self.list_failure == Some(index) {
            return Err(GmailError::Forbidden("HTTP 403: Forbidden".to_string()));
        }

        let messages = self
            .pages
            .get(index)
            .map(|page| {
                page.iter()
                    .map(|m| MessageSummary {
                        id: m.id.clone(),
                        thread_id: m.thread_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let next_page_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());

        Ok(MessagePage {
            messages,
            next_page_token,
        })
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetail> {
        let attempt = {
            let mut calls = self.get_calls.lock().unwrap();
            let count = calls.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        match self.failures.get(id) {
            Some(Failure::Permanent) => return Err(GmailError::NotFound(id.to_string())),
            Some(Failure::AlwaysRateLimited) => {
                return Err(GmailError::RateLimitExceeded("HTTP 429: Too Many Requests".to_string()))
            }
            Some(Failure::Transient(n)) if attempt <= *n => {
                return Err(GmailError::ServerError {
                    status: 503,
                    message: "HTTP 503: Service Unavailable".to_string(),
                })
            }
            _ => {}
        }

        self.pages
            .iter()
            .flatten()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| GmailError::NotFound(id.to_string()))
    }

    async fn get_attachment(&self, _message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        self.attachments
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| GmailError::NotFound(attachment_id.to_string()))
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_message() {
        let msg = create_test_message("msg1", "Test Subject");
        assert_eq!(msg.id, "msg1");
        assert_eq!(msg.subject(), "Test Subject");
        assert_eq!(msg.thread_id.as_deref(), Some("thread_msg1"));
    }

    #[tokio::test]
    async fn test_fake_mailbox_pages() {
        let mailbox = FakeMailbox::with_pages(vec![
            vec![create_test_message("a", "A"), create_test_message("b", "B")],
            vec![create_test_message("c", "C")],
        ]);

        let first = mailbox.list_messages("in:anywhere", 500, None).await.unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("1"));

        let second = mailbox
            .list_messages("in:anywhere", 500, first.next_page_token)
            .await
            .unwrap();
        assert_eq!(second.messages.len(), 1);
        assert!(second.next_page_token.is_none());
        assert_eq!(mailbox.list_calls(), 2);
    }
}
