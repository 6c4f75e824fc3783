// nachweisbackup/src/restore/mod.rs
mod logic;
pub(crate) mod content;
pub(crate) mod db_restore;
pub(crate) mod verification;

use serde::Serialize;

/// Outcome of a successful restore run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub file_name: String,
    pub database: String,
    /// Content directories that were replaced from the archive.
    pub restored_directories: Vec<String>,
}
