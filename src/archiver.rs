//! Compressed copy of the output tree
//!
//! After a completed run the whole output directory is packed into
//! `gmail_archive_<YYYYMMDD>_<HHMMSS>.zip` next to it. Entries are AES-256
//! encrypted when a password is given. Zip writing is blocking, so it runs on
//! the blocking thread pool.

use chrono::{DateTime, Local};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipWriter};

use crate::config::ArchiveFormat;
use crate::error::{GmailError, Result};
use crate::storage::unique_path;

const ARCHIVE_PREFIX: &str = "gmail_archive_";

/// Where an archive ended up and what went into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub files: u64,
    pub encrypted: bool,
}

pub struct Archiver {
    destination: PathBuf,
    format: ArchiveFormat,
}

impl Archiver {
    pub fn new(destination: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self {
            destination: destination.into(),
            format,
        }
    }

    /// Archiver writing into the parent of `output_dir`, so the archive is never part of its own input
    pub fn beside(output_dir: &Path, format: ArchiveFormat) -> Self {
        let destination = match output_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::new(destination, format)
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// `gmail_archive_20240101_093000.zip`
    pub fn archive_name(timestamp: DateTime<Local>) -> String {
        format!("{}{}.zip", ARCHIVE_PREFIX, timestamp.format("%Y%m%d_%H%M%S"))
    }

    /// Pack every file below `source` into a new archive
    pub async fn create_archive(&self, source: &Path, password: Option<&str>) -> Result<ArchiveSummary> {
        if !tokio::fs::try_exists(source).await? {
            return Err(GmailError::ArchiveError(format!(
                "Nothing to archive, {:?} does not exist",
                source
            )));
        }

        tokio::fs::create_dir_all(&self.destination).await?;
        let target = unique_path(&self.destination, &Self::archive_name(Local::now())).await?;
        info!("Creating archive {}", target.display());

        let encrypted = password_given(password);
        let source = source.to_path_buf();
        let password = password.map(str::to_string);
        let format = self.format;
        let path = target.clone();

        let files = tokio::task::spawn_blocking(move || {
            write_zip(&source, &path, format, password.as_deref())
        })
        .await
        .map_err(|e| GmailError::ArchiveError(format!("Archive task failed: {}", e)))??;

        let summary = ArchiveSummary {
            path: target,
            files,
            encrypted,
        };
        info!(
            "Archive created: {} ({} files{})",
            summary.path.display(),
            summary.files,
            if summary.encrypted { ", AES-256" } else { "" }
        );
        Ok(summary)
    }
}

fn password_given(password: Option<&str>) -> bool {
    password.is_some_and(|p| !p.is_empty())
}

fn write_zip(source: &Path, target: &Path, format: ArchiveFormat, password: Option<&str>) -> Result<u64> {
    let method = match format {
        ArchiveFormat::Zip => CompressionMethod::Deflated,
        ArchiveFormat::ZipStored => CompressionMethod::Stored,
    };
    let base = SimpleFileOptions::default()
        .compression_method(method)
        .unix_permissions(0o600);
    let options = match password.filter(|p| !p.is_empty()) {
        Some(password) => base.with_aes_encryption(AesMode::Aes256, password),
        None => base,
    };

    let mut zip = ZipWriter::new(BufWriter::new(File::create(target)?));
    let mut files = 0u64;

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| GmailError::ArchiveError(e.to_string()))?;
        let name = entry_name(relative);

        zip.start_file(name.as_str(), options)?;
        let mut input = File::open(entry.path())?;
        std::io::copy(&mut input, &mut zip)?;
        debug!("Archived {}", name);
        files += 1;
    }

    zip.finish()?;
    Ok(files)
}

/// Zip entry names always use `/`
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
