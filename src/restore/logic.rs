// nachweisbackup/src/restore/logic.rs
use std::path::Path;

use tracing::{error, info};

use super::content::swap_content_dirs;
use super::db_restore::{drop_database, prepare_replay};
use super::verification::verify_target_database;
use super::RestoreReport;
use crate::backup::archive::{extract_tar_gz_archive, DUMP_ENTRY};
use crate::catalog::resolve_archive;
use crate::engine::{discard_scratch, BackupEngine};
use crate::errors::{BackupError, Phase, Result};
use crate::retention::sweep_stale_artifacts;

impl BackupEngine {
    /// Replaces the database and the content directories with the state
    /// stored in `filename`.
    ///
    /// A failed database restore leaves the content directories untouched.
    /// A failed content swap leaves the database restored; running the
    /// restore again converges.
    pub async fn restore_backup(&self, filename: &str) -> Result<RestoreReport> {
        let _guard = self.try_lock()?;
        let archive = resolve_archive(self.directory(), filename)?;
        sweep_stale_artifacts(self.directory());

        let scratch = self.scratch_dir("restore", Phase::Unpack)?;
        info!(archive = filename, scratch = %scratch.path().display(), "starting restore");

        let outcome = self.restore_from(&archive, scratch.path()).await;
        discard_scratch(scratch);

        match outcome {
            Ok(restored_directories) => {
                info!(archive = filename, "✓ restore completed");
                Ok(RestoreReport {
                    file_name: filename.to_string(),
                    database: self.datasource().database.clone(),
                    restored_directories,
                })
            }
            Err(e) => {
                error!(
                    archive = filename,
                    kind = %e.kind(),
                    phase = ?e.phase(),
                    error = %e,
                    "restore failed"
                );
                Err(e)
            }
        }
    }

    async fn restore_from(&self, archive: &Path, scratch: &Path) -> Result<Vec<String>> {
        extract_tar_gz_archive(self.tools(), archive, scratch).await?;

        // Checked before the drop so a broken archive never costs the live database.
        let dump_file = scratch.join(DUMP_ENTRY);
        if !dump_file.is_file() {
            return Err(BackupError::CorruptArchive(format!(
                "{} has no {} entry",
                archive.display(),
                DUMP_ENTRY
            )));
        }

        // Both utilities are located before the drop for the same reason.
        let replay = prepare_replay(self.tools(), self.datasource(), &dump_file)?;

        let database = &self.datasource().database;
        drop_database(self.admin(), database).await?;
        replay.run().await?;
        verify_target_database(self.admin(), database).await?;

        swap_content_dirs(scratch, self.backend_root())
    }
}
