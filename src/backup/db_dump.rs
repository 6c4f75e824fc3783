// nachweisbackup/src/backup/db_dump.rs
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backup::archive::DUMP_ENTRY;
use crate::config::DatasourceConfig;
use crate::errors::{BackupError, Phase, Result};
use crate::tools::{self, Sink, Tool, ToolSet};

/// Dumps the application database as plain SQL through the compressor into
/// `<target_dump_dir>/database.sql.gz`.
///
/// The dump carries its own `CREATE DATABASE` statement so the archive can be
/// replayed against the administrative database.
pub async fn dump_database(
    tools: &ToolSet,
    datasource: &DatasourceConfig,
    target_dump_dir: &Path,
) -> Result<PathBuf> {
    let dump_file = target_dump_dir.join(DUMP_ENTRY);

    let dumper = tools
        .invocation(Tool::Dumper, Phase::Dump)?
        .connect_to(datasource, &datasource.database)
        .args(["-F", "plain", "--create"]);
    let compressor = tools
        .invocation(Tool::Compressor, Phase::Compress)?
        .arg("-c");

    let output = File::create(&dump_file).map_err(|e| {
        BackupError::io(
            Some(Phase::Compress),
            format!("creating {}", dump_file.display()),
            e,
        )
    })?;

    info!(database = %datasource.database, "dumping database");
    let bytes = tools::pipe(&dumper, &compressor, Sink::File(output)).await?;
    info!(
        database = %datasource.database,
        uncompressed_bytes = bytes,
        dump = %dump_file.display(),
        "✓ database dump created"
    );

    Ok(dump_file)
}
