//! Paginated message listing
//!
//! `MessageLister` turns the provider's page-at-a-time list endpoint into a
//! lazy stream of `MessageSummary` values. Pages are requested only as the
//! consumer pulls, and listing stops as soon as the optional result cap is
//! reached, even in the middle of a page.

use crate::client::MailApi;
use crate::error::Result;
use crate::models::MessageSummary;
use crate::retry::BackoffExecutor;
use async_stream::stream;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

/// Largest page the Gmail list endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 500;

/// What to list and how much of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub query: String,
    /// Stop after this many summaries; `None` lists everything
    pub max_results: Option<u32>,
    pub page_size: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            query: "in:anywhere".to_string(),
            max_results: None,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

pub type SummaryStream<'a> = Pin<Box<dyn Stream<Item = Result<MessageSummary>> + Send + 'a>>;

pub struct MessageLister {
    api: Arc<dyn MailApi>,
    executor: BackoffExecutor,
    options: ListOptions,
}

impl MessageLister {
    pub fn new(api: Arc<dyn MailApi>, executor: BackoffExecutor, options: ListOptions) -> Self {
        Self {
            api,
            executor,
            options,
        }
    }

    pub fn options(&self) -> &ListOptions {
        &self.options
    }

    /// Stream summaries in provider order
    ///
    /// A listing failure is yielded once as `Err` and ends the stream.
    /// `total_scanned` is bumped for every summary yielded.
    pub fn messages(&self) -> SummaryStream<'_> {
        let query = self.options.query.clone();
        let page_size = self.options.page_size.clamp(1, MAX_PAGE_SIZE);
        let cap = self.options.max_results;

        Box::pin(stream! {
            let mut yielded: u32 = 0;
            let mut page_token: Option<String> = None;
            let mut pages: u32 = 0;

            if cap == Some(0) {
                info!("Result cap is 0, nothing to list");
                return;
            }

            loop {
                let token = page_token.clone();
                let page = self
                    .executor
                    .execute("list messages", || {
                        self.api.list_messages(&query, page_size, token.clone())
                    })
                    .await;

                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                pages += 1;

                if page.messages.is_empty() {
                    debug!("Page {} is empty, listing complete", pages);
                    break;
                }

                debug!("Page {} returned {} messages", pages, page.messages.len());

                for summary in page.messages {
                    self.executor.stats().record_scanned();
                    yielded += 1;
                    yield Ok(summary);

                    if cap.is_some_and(|max| yielded >= max) {
                        info!("Reached max results limit ({})", yielded);
                        return;
                    }
                }

                page_token = page.next_page_token;
                if page_token.is_none() {
                    break;
                }
            }

            info!("Listed {} messages across {} pages", yielded, pages);
        })
    }
}
