use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GmailError, Result};
use crate::retry::RetryPolicy;
use crate::scanner::{ListOptions, MAX_PAGE_SIZE};

/// Highest request rate Gmail tolerates before quota errors become routine
pub const RECOMMENDED_MAX_RPS: f64 = 250.0;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    /// Gmail search query selecting the messages to archive
    #[serde(default = "default_query")]
    pub query: String,
    /// Stop after this many messages; unset or 0 archives everything
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default = "default_include_attachments")]
    pub include_attachments: bool,
    /// Permanently delete each message after it has been saved
    #[serde(default)]
    pub delete_after_download: bool,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            query: default_query(),
            max_results: None,
            include_attachments: default_include_attachments(),
            delete_after_download: false,
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// 0 disables rate limiting
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_max_subject_length")]
    pub max_subject_length: usize,
    #[serde(default = "default_max_filename_length")]
    pub max_filename_length: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_subject_length: default_max_subject_length(),
            max_filename_length: default_max_filename_length(),
        }
    }
}

/// Compressed copy of the output tree made after a completed run
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Encryption password; prefer `password_file` outside of testing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// File holding the password, e.g. a mounted secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(default)]
    pub format: ArchiveFormat,
}

impl ArchiveConfig {
    /// Password from `password`, falling back to the trimmed contents of `password_file`
    pub async fn resolve_password(&self) -> Result<Option<String>> {
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            return Ok(Some(password.clone()));
        }

        let Some(path) = &self.password_file else {
            return Ok(None);
        };

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GmailError::ConfigError(format!("Failed to read archive password file {:?}: {}", path, e))
        })?;
        let password = content.trim();
        if password.is_empty() {
            return Err(GmailError::ConfigError(format!(
                "Archive password file {:?} is empty",
                path
            )));
        }
        Ok(Some(password.to_string()))
    }
}

/// Zip entry compression; every format is AES-256 encrypted when a password is set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    /// Deflate-compressed zip
    #[default]
    Zip,
    /// Zip without compression, for trees dominated by already-compressed attachments
    ZipStored,
}

fn default_query() -> String {
    "in:anywhere".to_string()
}

fn default_include_attachments() -> bool {
    true
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_requests_per_second() -> f64 {
    10.0
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/emails")
}

fn default_max_subject_length() -> usize {
    50
}

fn default_max_filename_length() -> usize {
    200
}

impl Config {
    /// Read and parse the TOML file without validating it
    ///
    /// Callers validate once, after command-line overrides are applied.
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GmailError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GmailError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| GmailError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| GmailError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Reject values the downloader cannot run with
    ///
    /// Risky but legal settings are logged as warnings, see [`Config::warnings`].
    pub fn validate(&self) -> Result<()> {
        let rps = self.rate_limit.requests_per_second;
        if !rps.is_finite() || rps < 0.0 {
            return Err(GmailError::ConfigError(format!(
                "rate_limit.requests_per_second must be a non-negative number, got {}",
                rps
            )));
        }

        if self.rate_limit.max_retries > 20 {
            return Err(GmailError::ConfigError(
                "rate_limit.max_retries cannot exceed 20".to_string(),
            ));
        }

        if self.download.page_size == 0 || self.download.page_size > MAX_PAGE_SIZE {
            return Err(GmailError::ConfigError(format!(
                "download.page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.download.query.trim().is_empty() {
            return Err(GmailError::ConfigError(
                "download.query cannot be empty (use \"in:anywhere\" for all mail)".to_string(),
            ));
        }

        if self.output.max_subject_length < 8 {
            return Err(GmailError::ConfigError(
                "output.max_subject_length must be at least 8".to_string(),
            ));
        }
        if self.output.max_filename_length < 8 {
            return Err(GmailError::ConfigError(
                "output.max_filename_length must be at least 8".to_string(),
            ));
        }

        let archive = &self.archive;
        let has_password = archive.password.as_deref().is_some_and(|p| !p.is_empty());
        if archive.enabled && !has_password && archive.password_file.is_none() {
            return Err(GmailError::ConfigError(
                "archive.password or archive.password_file is required when archiving is enabled"
                    .to_string(),
            ));
        }

        for warning in self.warnings() {
            tracing::warn!("{}", warning);
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Settings that are allowed but deserve the user's attention
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.rate_limit.requests_per_second > RECOMMENDED_MAX_RPS {
            warnings.push(format!(
                "requests_per_second = {} exceeds Gmail's per-user limit of {}; expect 429 responses",
                self.rate_limit.requests_per_second, RECOMMENDED_MAX_RPS
            ));
        }

        if self.download.delete_after_download {
            warnings.push(
                "delete_after_download is enabled: messages will be PERMANENTLY deleted from Gmail"
                    .to_string(),
            );
        }

        warnings
    }

    /// Effective result cap; 0 means no cap
    pub fn max_results(&self) -> Option<u32> {
        self.download.max_results.filter(|&n| n > 0)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.rate_limit.max_retries,
            Duration::from_millis(self.rate_limit.base_delay_ms),
        )
    }

    pub fn list_options(&self) -> ListOptions {
        ListOptions {
            query: self.download.query.clone(),
            max_results: self.max_results(),
            page_size: self.download.page_size,
        }
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
