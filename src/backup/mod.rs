// nachweisbackup/src/backup/mod.rs
mod logic;
pub(crate) mod archive;
pub(crate) mod db_dump;

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Outcome of one successful backup run. Failures are returned as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    /// Completion time.
    pub timestamp: DateTime<Local>,
    pub status: &'static str,
}
