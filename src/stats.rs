//! Download statistics shared between the fetch loop and presentation layers
//!
//! `StatsAggregator` is owned by a single download run and handed to the
//! executor and lister by `Arc`. Counters only ever grow. Readers take a
//! `DownloadStats` snapshot, which is a plain copyable value.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub total_scanned: u64,
    pub downloaded: u64,
    pub attachments_saved: u64,
    pub bytes_saved: u64,
    pub errors: u64,
    pub rate_limit_hits: u64,
    pub retries: u64,
}

impl DownloadStats {
    /// Saved attachment volume in MiB
    pub fn megabytes_saved(&self) -> f64 {
        self.bytes_saved as f64 / (1024.0 * 1024.0)
    }

    /// Share of scanned messages already downloaded, 0-100
    pub fn percent_complete(&self) -> Option<f64> {
        if self.total_scanned == 0 {
            return None;
        }
        Some(self.downloaded as f64 / self.total_scanned as f64 * 100.0)
    }
}

/// Monotonic run counters
///
/// Every update is a single atomic add, so the aggregator can be shared with
/// several workers without a lock.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    total_scanned: AtomicU64,
    downloaded: AtomicU64,
    attachments_saved: AtomicU64,
    bytes_saved: AtomicU64,
    errors: AtomicU64,
    rate_limit_hits: AtomicU64,
    retries: AtomicU64,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scanned(&self) {
        self.total_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one saved attachment of `bytes` decoded bytes
    pub fn record_attachment(&self, bytes: u64) {
        self.attachments_saved.fetch_add(1, Ordering::Relaxed);
        self.bytes_saved.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a scheduled retry; rate-limit retries also bump `rate_limit_hits`
    pub fn record_retry(&self, rate_limited: bool) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        if rate_limited {
            self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DownloadStats {
        DownloadStats {
            total_scanned: self.total_scanned.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            attachments_saved: self.attachments_saved.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
