//! Status file for headless runs and external monitors
//!
//! The file is rewritten in full on every update: JSON goes to a sibling
//! `.tmp` file first and is then renamed over the real path, so readers
//! never see a half-written document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::stats::DownloadStats;

pub const DEFAULT_STATUS_FILE: &str = "/tmp/gmail-archiver-status.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Starting,
    Running,
    Complete,
    Cancelled,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Starting => "starting",
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Run settings echoed into the status file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusConfig {
    pub query: String,
    pub output_dir: PathBuf,
    pub include_attachments: bool,
    pub delete_after_download: bool,
    pub max_results: Option<u32>,
    pub requests_per_second: f64,
}

impl From<&Config> for StatusConfig {
    fn from(config: &Config) -> Self {
        Self {
            query: config.download.query.clone(),
            output_dir: config.output.output_dir.clone(),
            include_attachments: config.download.include_attachments,
            delete_after_download: config.download.delete_after_download,
            max_results: config.max_results(),
            requests_per_second: config.rate_limit.requests_per_second,
        }
    }
}

/// Document stored in the status file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub stats: DownloadStats,
    pub config: StatusConfig,
}

impl StatusReport {
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let report: Self = serde_json::from_str(&json)?;
        Ok(report)
    }
}

/// Writes `StatusReport`s for one run
///
/// Writes are synchronous so they can happen from inside the progress
/// callback.
#[derive(Debug, Clone)]
pub struct StatusWriter {
    path: PathBuf,
    run_id: Uuid,
    config: StatusConfig,
}

impl StatusWriter {
    pub fn new(path: impl Into<PathBuf>, config: StatusConfig) -> Self {
        Self {
            path: path.into(),
            run_id: Uuid::new_v4(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Write the status file, logging instead of failing
    pub fn write(&self, status: RunStatus, stats: &DownloadStats) {
        if let Err(e) = self.try_write(status, stats) {
            tracing::warn!("Failed to write status file {:?}: {}", self.path, e);
        }
    }

    pub fn try_write(&self, status: RunStatus, stats: &DownloadStats) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let report = StatusReport {
            status,
            timestamp: Utc::now(),
            run_id: self.run_id,
            stats: *stats,
            config: self.config.clone(),
        };
        let json = serde_json::to_string_pretty(&report)?;

        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &self.path)?;

        tracing::debug!("Wrote status '{}' to {:?}", status, self.path);
        Ok(())
    }
}

/// One-line summary for shell prompts and status bars
pub fn format_for_powerline(stats: &DownloadStats) -> String {
    let mut line = match stats.percent_complete() {
        Some(percent) => format!(
            "📧 {}/{} ({:.0}%)",
            stats.downloaded, stats.total_scanned, percent
        ),
        None => format!("📧 {}", stats.downloaded),
    };

    if stats.errors > 0 {
        line.push_str(&format!(" ⚠️{}", stats.errors));
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stats(downloaded: u64, total: u64, errors: u64) -> DownloadStats {
        DownloadStats {
            total_scanned: total,
            downloaded,
            errors,
            ..Default::default()
        }
    }

    #[test]
    fn test_powerline_format() {
        assert_eq!(format_for_powerline(&stats(0, 0, 0)), "📧 0");
        assert_eq!(format_for_powerline(&stats(5, 10, 0)), "📧 5/10 (50%)");
        assert_eq!(format_for_powerline(&stats(2, 3, 1)), "📧 2/3 (67%) ⚠️1");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(RunStatus::Complete.to_string(), "complete");
    }

    #[tokio::test]
    async fn test_write_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("status").join("run.json");
        let writer = StatusWriter::new(&path, StatusConfig::from(&Config::default()));

        writer.try_write(RunStatus::Starting, &DownloadStats::default()).unwrap();
        writer.try_write(RunStatus::Running, &stats(3, 7, 1)).unwrap();

        let report = StatusReport::load(&path).await.unwrap();
        assert_eq!(report.status, RunStatus::Running);
        assert_eq!(report.run_id, writer.run_id());
        assert_eq!(report.stats.downloaded, 3);
        assert_eq!(report.config.query, "in:anywhere");

        // No temp file left behind
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_json_top_level_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("status.json");
        let writer = StatusWriter::new(&path, StatusConfig::from(&Config::default()));
        writer.try_write(RunStatus::Complete, &stats(1, 1, 0)).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        for key in ["status", "timestamp", "run_id", "stats", "config"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["status"], "complete");
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        // A directory where the file should go makes the rename fail
        let path = temp.path().join("occupied");
        std::fs::create_dir_all(path.join("child")).unwrap();

        let writer = StatusWriter::new(&path, StatusConfig::from(&Config::default()));
        assert!(writer.try_write(RunStatus::Running, &DownloadStats::default()).is_err());
        writer.write(RunStatus::Running, &DownloadStats::default());
    }
}
