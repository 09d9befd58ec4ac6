//! Live terminal view for interactive runs

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

use crate::stats::DownloadStats;
use crate::status::{RunStatus, StatusConfig};

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Counter line shown under the status spinner
pub fn format_counters(stats: &DownloadStats, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        stats.downloaded as f64 / secs
    } else {
        0.0
    };

    format!(
        "scanned {} | downloaded {} | attachments {} ({:.2} MB) | errors {} | rate limits {} | retries {} | {:.1} msg/s",
        stats.total_scanned,
        stats.downloaded,
        stats.attachments_saved,
        stats.megabytes_saved(),
        stats.errors,
        stats.rate_limit_hits,
        stats.retries,
        rate
    )
}

/// Configuration header printed once above the live lines
pub fn format_header(config: &StatusConfig) -> Vec<String> {
    let max_results = config
        .max_results
        .map(|n| n.to_string())
        .unwrap_or_else(|| "all".to_string());
    let rate = if config.requests_per_second > 0.0 {
        format!("{} req/s", config.requests_per_second)
    } else {
        "unlimited".to_string()
    };

    let mut lines = vec![
        format!("Query:        {}", truncate_string(&config.query, 60)),
        format!("Output:       {}", config.output_dir.display()),
        format!(
            "Attachments:  {}",
            if config.include_attachments { "yes" } else { "no" }
        ),
        format!("Max results:  {}", max_results),
        format!("Rate limit:   {}", rate),
    ];
    if config.delete_after_download {
        lines.push("⚠ DELETE MODE: messages are permanently removed after download".to_string());
    }
    lines
}

/// Spinner plus counter line driven by the progress callback
pub struct Dashboard {
    multi: MultiProgress,
    status: ProgressBar,
    counters: ProgressBar,
    started: Instant,
}

impl Dashboard {
    /// Attach to `multi`, the same instance log lines are printed through
    pub fn new(multi: MultiProgress, config: &StatusConfig) -> Self {
        for line in format_header(config) {
            let _ = multi.println(line);
        }

        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");
        let line_style = ProgressStyle::default_spinner()
            .template("  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(spinner_style);
        status.set_message("Starting...");
        status.enable_steady_tick(Duration::from_millis(100));

        let counters = multi.add(ProgressBar::new_spinner());
        counters.set_style(line_style);
        counters.set_message(format_counters(&DownloadStats::default(), Duration::ZERO));

        Self {
            multi,
            status,
            counters,
            started: Instant::now(),
        }
    }

    pub fn update(&self, stats: &DownloadStats) {
        self.status.set_message(format!("Downloading... {} messages saved", stats.downloaded));
        self.counters
            .set_message(format_counters(stats, self.started.elapsed()));
    }

    /// Freeze the view with the final state
    pub fn finish(&self, status: RunStatus, stats: &DownloadStats) {
        let label = match status {
            RunStatus::Complete => "✓ Complete",
            RunStatus::Cancelled => "✗ Cancelled",
            RunStatus::Error => "✗ Failed",
            RunStatus::Starting | RunStatus::Running => "…",
        };
        self.counters
            .finish_with_message(format_counters(stats, self.started.elapsed()));
        self.status.finish_with_message(label.to_string());
        let _ = self.multi.println("");
    }
}
