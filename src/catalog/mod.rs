// nachweisbackup/src/catalog/mod.rs
//! Listing and deletion of archives. The backup directory is the catalog;
//! nothing is cached between calls.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::backup::archive::ARCHIVE_SUFFIX;
use crate::engine::BackupEngine;
use crate::errors::{BackupError, Result};

/// Plain archive file names: no separators, no leading dot.
static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*\.tar\.gz$").expect("archive name pattern is valid")
});

fn is_archive_name(filename: &str) -> bool {
    ARCHIVE_NAME.is_match(filename)
}

/// One row of the backup listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveInfo {
    #[serde(rename = "filename")]
    pub name: String,
    #[serde(rename = "fileSize")]
    pub size: u64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Local>,
}

/// Maps a caller-supplied file name to an existing archive in `directory`.
/// Anything that is not a plain archive name counts as missing.
pub fn resolve_archive(directory: &Path, filename: &str) -> Result<PathBuf> {
    if !is_archive_name(filename) {
        debug!(filename, "rejected archive name");
        return Err(BackupError::NotFound(filename.to_string()));
    }
    let path = directory.join(filename);
    if !path.is_file() {
        return Err(BackupError::NotFound(filename.to_string()));
    }
    Ok(path)
}

/// Archives in `directory`, newest first. Entries that cannot be stat'd are skipped.
pub fn list_archives(directory: &Path) -> Result<Vec<ArchiveInfo>> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(BackupError::io(
                None,
                format!("listing {}", directory.display()),
                e,
            ))
        }
    };

    let mut archives: Vec<ArchiveInfo> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(ARCHIVE_SUFFIX) || name.starts_with('.') {
                return None;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => return None,
                Err(e) => {
                    debug!(archive = %name, error = %e, "skipping unreadable entry");
                    return None;
                }
            };
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    debug!(archive = %name, error = %e, "skipping entry without mtime");
                    return None;
                }
            };
            Some(ArchiveInfo {
                name,
                size: metadata.len(),
                created_at: DateTime::<Local>::from(modified),
            })
        })
        .collect();

    archives.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });
    Ok(archives)
}

impl BackupEngine {
    pub fn list_backups(&self) -> Result<Vec<ArchiveInfo>> {
        list_archives(self.directory())
    }

    /// Removes one archive. There is no recycle bin.
    pub fn delete_backup(&self, filename: &str) -> Result<()> {
        let path = resolve_archive(self.directory(), filename)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(archive = filename, "backup deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BackupError::NotFound(filename.to_string()))
            }
            Err(e) => Err(BackupError::io(
                None,
                format!("deleting {}", path.display()),
                e,
            )),
        }
    }
}
