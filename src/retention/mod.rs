// nachweisbackup/src/retention/mod.rs
//! Retention sweep over finished archives, and cleanup of whatever an
//! interrupted run left behind in the backup directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::backup::archive::{ARCHIVE_SUFFIX, PARTIAL_SUFFIX};
use crate::engine::{BackupEngine, SCRATCH_PREFIX};
use crate::utils::remove_dir_best_effort;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Deletes archives in `directory` whose mtime is strictly older than
/// `now - retention_days`. Per-file failures are logged and skipped.
///
/// Returns the paths that were deleted.
pub fn sweep_expired(directory: &Path, retention_days: u32, now: SystemTime) -> Vec<PathBuf> {
    let Some(cutoff) =
        now.checked_sub(Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY))
    else {
        return Vec::new();
    };

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(directory = %directory.display(), error = %e, "retention sweep could not read directory");
            return Vec::new();
        }
    };

    let mut deleted = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(ARCHIVE_SUFFIX) {
            continue;
        }
        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(archive = %name, error = %e, "cannot read mtime, skipping");
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(archive = %name, "deleted expired backup");
                deleted.push(path);
            }
            Err(e) => warn!(archive = %name, error = %e, "failed to delete expired backup"),
        }
    }
    deleted
}

/// Removes leftovers of interrupted runs: scratch directories, partial
/// archives and zero-byte archives. Must only run while the directory lock is held.
pub fn sweep_stale_artifacts(directory: &Path) -> usize {
    let Ok(entries) = fs::read_dir(directory) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };

        let stale = if metadata.is_dir() {
            name.starts_with(SCRATCH_PREFIX)
        } else {
            name.ends_with(PARTIAL_SUFFIX) || (name.ends_with(ARCHIVE_SUFFIX) && metadata.len() == 0)
        };
        if !stale {
            continue;
        }

        warn!(path = %path.display(), "removing leftover of an interrupted run");
        if metadata.is_dir() {
            remove_dir_best_effort(&path);
            removed += 1;
        } else if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to remove leftover");
        } else {
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(removed, "stale artifacts cleaned up");
    }
    removed
}

impl BackupEngine {
    /// Applies the configured retention to the backup directory.
    pub fn cleanup_old_backups(&self) -> Vec<PathBuf> {
        let deleted = sweep_expired(
            self.directory(),
            self.config().retention_days,
            SystemTime::now(),
        );
        info!(
            retention_days = self.config().retention_days,
            deleted = deleted.len(),
            "retention sweep finished"
        );
        deleted
    }
}
