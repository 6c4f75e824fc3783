// nachweisbackup/src/restore/verification.rs
use tracing::info;

use super::db_restore::AdminSql;
use crate::errors::{BackupError, Phase, Result};

/// Confirms the replayed dump recreated the application database.
///
/// The dump runs against the administrative database and relies on its own
/// `CREATE DATABASE`; a dump without it would load into the wrong place.
pub async fn verify_target_database(admin: &dyn AdminSql, database: &str) -> Result<()> {
    let exists = admin.database_exists(database).await.map_err(|e| {
        BackupError::step(
            Phase::Restore,
            format!("could not verify database '{}': {:#}", database, e),
        )
    })?;

    if !exists {
        return Err(BackupError::step(
            Phase::Restore,
            format!(
                "database '{}' does not exist after replaying the dump",
                database
            ),
        ));
    }

    info!(database, "✓ restore verification passed");
    Ok(())
}
