//! On-disk layout for archived messages
//!
//! Each message gets its own directory:
//!
//! ```text
//! <output_dir>/<YYYY>/<MM>/<DD>/<HHMMSS>_<subject>_<id[..8]>/
//!     metadata.json
//!     body.txt, body.html, body_1.txt, ...
//!     attachments/<filename>
//! ```

use chrono::{DateTime, FixedOffset, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{MessageDetail, MessageRecord};

/// Characters that are unsafe in file names on at least one major platform
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '\0'];

/// Replacement for names that sanitize down to nothing
pub const PLACEHOLDER_NAME: &str = "unnamed";

/// Longest suffix still treated as a file extension, dot included
const MAX_EXTENSION_CHARS: usize = 10;

pub const DEFAULT_MAX_SUBJECT_LENGTH: usize = 50;
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 200;

/// Make `name` safe to use as a single path component
///
/// Unsafe characters become `_`. Names longer than `max_length` characters
/// are shortened to `<stem>...<ext>` so the extension survives. Leading and
/// trailing dots and spaces are stripped, and an empty result becomes
/// `unnamed`.
pub fn sanitize_filename(name: &str, max_length: usize) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect();

    let truncated = if replaced.chars().count() > max_length {
        truncate_keeping_extension(&replaced, max_length)
    } else {
        replaced
    };

    let trimmed = truncated.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn truncate_keeping_extension(name: &str, max_length: usize) -> String {
    let (stem, ext) = split_extension(name);
    let ext_len = ext.chars().count();

    if ext_len + 3 >= max_length {
        return name.chars().take(max_length).collect();
    }

    let keep = max_length - ext_len - 3;
    let mut out: String = stem.chars().take(keep).collect();
    out.push_str("...");
    out.push_str(ext);
    out
}

/// Split `name` into stem and extension (`.pdf`); the extension may be empty
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &name[idx..];
            let plausible = ext.chars().count() <= MAX_EXTENSION_CHARS
                && ext[1..].chars().all(|c| c.is_alphanumeric());
            if plausible && ext.len() > 1 {
                (&name[..idx], ext)
            } else {
                (name, "")
            }
        }
        _ => (name, ""),
    }
}

/// First path in `dir` named `name`, `stem_1.ext`, `stem_2.ext`, ... that does not exist yet
pub async fn unique_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let (stem, ext) = split_extension(name);
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}{}", stem, counter, ext));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// Parse an RFC 2822 `Date` header
///
/// Trailing comments such as `(UTC)` are tolerated and RFC 3339 is accepted
/// as a second chance. Anything else falls back to the current local time.
pub fn parse_email_date(value: &str) -> DateTime<FixedOffset> {
    let trimmed = value.trim();

    if let Ok(date) = DateTime::parse_from_rfc2822(trimmed) {
        return date;
    }

    if let Some(idx) = trimmed.rfind('(') {
        if let Ok(date) = DateTime::parse_from_rfc2822(trimmed[..idx].trim_end()) {
            return date;
        }
    }

    if let Ok(date) = DateTime::parse_from_rfc3339(trimmed) {
        return date;
    }

    warn!("Could not parse date '{}', using current time", value);
    Local::now().fixed_offset()
}

/// Writes messages under a root directory
#[derive(Debug, Clone)]
pub struct MessageStore {
    root: PathBuf,
    max_subject_length: usize,
    max_filename_length: usize,
}

impl MessageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_limits(root, DEFAULT_MAX_SUBJECT_LENGTH, DEFAULT_MAX_FILENAME_LENGTH)
    }

    pub fn with_limits(
        root: impl Into<PathBuf>,
        max_subject_length: usize,
        max_filename_length: usize,
    ) -> Self {
        Self {
            root: root.into(),
            max_subject_length,
            max_filename_length,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a message is stored in; does not touch the filesystem
    pub fn message_dir(&self, detail: &MessageDetail) -> PathBuf {
        let date = parse_email_date(detail.date());
        let subject = sanitize_filename(detail.subject(), self.max_subject_length);
        let id_prefix: String = detail.id.chars().take(8).collect();

        self.root
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(date.format("%d").to_string())
            .join(format!("{}_{}_{}", date.format("%H%M%S"), subject, id_prefix))
    }

    /// Create the message directory and write `metadata.json` into it
    pub async fn create_message_dir(&self, detail: &MessageDetail) -> Result<PathBuf> {
        let dir = self.message_dir(detail);
        tokio::fs::create_dir_all(&dir).await?;
        self.write_metadata(&dir, detail).await?;
        Ok(dir)
    }

    pub async fn write_metadata(&self, dir: &Path, detail: &MessageDetail) -> Result<()> {
        let record = MessageRecord::from(detail);
        let json = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(dir.join("metadata.json"), json).await?;
        Ok(())
    }

    /// Save a text body part as `body.txt` or `body.html`
    ///
    /// Returns `None` for MIME types that are not message bodies. Invalid
    /// UTF-8 is replaced rather than rejected.
    pub async fn write_body(&self, dir: &Path, mime_type: &str, data: &[u8]) -> Result<Option<PathBuf>> {
        let name = match mime_type {
            "text/plain" => "body.txt",
            "text/html" => "body.html",
            _ => return Ok(None),
        };

        let path = unique_path(dir, name).await?;
        let content = String::from_utf8_lossy(data);
        tokio::fs::write(&path, content.as_bytes()).await?;
        debug!("Saved body {}", path.display());
        Ok(Some(path))
    }

    /// Save attachment bytes under `attachments/`, never overwriting
    pub async fn write_attachment(&self, dir: &Path, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let attachments_dir = dir.join("attachments");
        tokio::fs::create_dir_all(&attachments_dir).await?;

        let safe_name = sanitize_filename(filename, self.max_filename_length);
        let path = unique_path(&attachments_dir, &safe_name).await?;
        tokio::fs::write(&path, data).await?;
        debug!("Saved attachment {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }
}
