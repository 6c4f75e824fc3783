// nachweisbackup/src/backup/logic.rs
use std::fs;
use std::path::Path;

use chrono::Local;
use tracing::{error, info};

use super::archive::{
    choose_archive_name, collect_sources, create_tar_gz_archive, partial_path,
    verify_archive_contents,
};
use super::db_dump::dump_database;
use super::{BackupResult, STATUS_SUCCESS};
use crate::engine::{discard_scratch, BackupEngine};
use crate::errors::{BackupError, Phase, Result};
use crate::retention::sweep_stale_artifacts;

impl BackupEngine {
    /// Manual backup: claims the directory, then composes one archive.
    pub async fn perform_backup(&self) -> Result<BackupResult> {
        let _guard = self.try_lock()?;
        self.compose_archive().await
    }

    /// Writes one archive. The caller must hold the run lock.
    pub(crate) async fn compose_archive(&self) -> Result<BackupResult> {
        self.ensure_directory()?;
        sweep_stale_artifacts(self.directory());

        let (file_name, started) = choose_archive_name(self.directory(), Local::now)?;
        let archive_path = self.directory().join(&file_name);
        info!(archive = %file_name, started = %started.to_rfc3339(), "starting backup");

        let scratch = self.scratch_dir("backup", Phase::Dump)?;
        let outcome = self.write_archive(scratch.path(), &archive_path).await;
        discard_scratch(scratch);

        match outcome {
            Ok(file_size) => {
                info!(archive = %file_name, bytes = file_size, "✓ backup created");
                Ok(BackupResult {
                    file_path: archive_path,
                    file_name,
                    file_size,
                    timestamp: Local::now(),
                    status: STATUS_SUCCESS,
                })
            }
            Err(e) => {
                error!(
                    archive = %file_name,
                    kind = %e.kind(),
                    phase = ?e.phase(),
                    error = %e,
                    "backup failed"
                );
                Err(e)
            }
        }
    }

    /// Dump, pack into the partial file, check it, rename it into place.
    /// Returns the final archive size.
    async fn write_archive(&self, scratch: &Path, archive_path: &Path) -> Result<u64> {
        dump_database(self.tools(), self.datasource(), scratch).await?;

        let sources = collect_sources(scratch, self.backend_root());
        let partial = partial_path(archive_path);
        create_tar_gz_archive(self.tools(), &sources, &partial).await?;
        verify_archive_contents(&partial, &sources)?;

        fs::rename(&partial, archive_path).map_err(|e| {
            BackupError::io(
                Some(Phase::Pack),
                format!("moving archive into place at {}", archive_path.display()),
                e,
            )
        })?;

        fs::metadata(archive_path)
            .map(|metadata| metadata.len())
            .map_err(|e| BackupError::io(Some(Phase::Pack), "reading archive size", e))
    }
}
