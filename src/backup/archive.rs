// nachweisbackup/src/backup/archive.rs
use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::{debug, info};

use crate::errors::{BackupError, Phase, Result};
use crate::tools::{self, Tool, ToolSet};

pub const ARCHIVE_PREFIX: &str = "nachweise_backup_";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
pub const PARTIAL_SUFFIX: &str = ".partial";
pub const DUMP_ENTRY: &str = "database.sql.gz";
/// Content directories below the backend root, in archive order.
pub const CONTENT_DIRS: [&str; 2] = ["generated_pdfs", "uploads"];

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `nachweise_backup_<yyyyMMdd_HHmmss>.tar.gz`
pub fn archive_file_name(timestamp: &DateTime<Local>) -> String {
    format!(
        "{}{}{}",
        ARCHIVE_PREFIX,
        timestamp.format(TIMESTAMP_FORMAT),
        ARCHIVE_SUFFIX
    )
}

/// Picks a file name that does not exist yet in `directory`.
///
/// Samples the clock once more if the first name is taken; a second
/// collision fails the run instead of overwriting an existing archive.
pub fn choose_archive_name<F>(directory: &Path, mut now: F) -> Result<(String, DateTime<Local>)>
where
    F: FnMut() -> DateTime<Local>,
{
    let first = now();
    let name = archive_file_name(&first);
    if !directory.join(&name).exists() {
        return Ok((name, first));
    }

    let second = now();
    let retry = archive_file_name(&second);
    if !directory.join(&retry).exists() {
        return Ok((retry, second));
    }

    Err(BackupError::Collision(format!(
        "{} already exists in {}",
        retry,
        directory.display()
    )))
}

/// Where the packer writes before the archive is renamed into place.
pub fn partial_path(archive_path: &Path) -> PathBuf {
    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    archive_path.with_file_name(format!(".{}{}", file_name, PARTIAL_SUFFIX))
}

/// One `-C <base> <entry>` pair handed to the packer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSource {
    pub base: PathBuf,
    pub entry: String,
}

/// The dump first, then each content directory that exists under `backend_root`.
pub fn collect_sources(scratch_dir: &Path, backend_root: &Path) -> Vec<PackSource> {
    let mut sources = vec![PackSource {
        base: scratch_dir.to_path_buf(),
        entry: DUMP_ENTRY.to_string(),
    }];

    for dir in CONTENT_DIRS {
        if backend_root.join(dir).is_dir() {
            info!(directory = dir, "including content directory in backup");
            sources.push(PackSource {
                base: backend_root.to_path_buf(),
                entry: dir.to_string(),
            });
        } else {
            debug!(directory = dir, "content directory not present, skipping");
        }
    }
    sources
}

/// Creates a gzip-compressed tar archive at `archive_dest_path` from `sources`.
pub async fn create_tar_gz_archive(
    tools: &ToolSet,
    sources: &[PackSource],
    archive_dest_path: &Path,
) -> Result<()> {
    let mut packer = tools
        .invocation(Tool::Packer, Phase::Pack)?
        .arg("-czf")
        .arg(archive_dest_path);
    for source in sources {
        packer = packer.arg("-C").arg(&source.base).arg(&source.entry);
    }

    info!(archive = %archive_dest_path.display(), "creating tar.gz archive");
    tools::run(&packer).await
}

/// Extracts a tar.gz archive into `extract_to_dir`.
pub async fn extract_tar_gz_archive(
    tools: &ToolSet,
    archive_path: &Path,
    extract_to_dir: &Path,
) -> Result<()> {
    let unpacker = tools
        .invocation(Tool::Unpacker, Phase::Unpack)?
        .arg("-xzf")
        .arg(archive_path)
        .arg("-C")
        .arg(extract_to_dir);

    info!(
        archive = %archive_path.display(),
        destination = %extract_to_dir.display(),
        "extracting tar.gz archive"
    );
    tools::run(&unpacker).await
}

/// Top-level entry names of a tar.gz archive, in order of first appearance.
pub fn top_level_entries(archive_path: &Path) -> std::io::Result<Vec<String>> {
    let archive_file = File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(archive_file));

    let mut names: Vec<String> = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        let first = path.components().find_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        });
        if let Some(first) = first {
            if !names.contains(&first) {
                names.push(first);
            }
        }
    }
    Ok(names)
}

/// Checks that the archive holds exactly the packed sources, dump first.
pub fn verify_archive_contents(archive_path: &Path, sources: &[PackSource]) -> Result<()> {
    let entries = top_level_entries(archive_path).map_err(|e| {
        BackupError::io(Some(Phase::Pack), "reading back the written archive", e)
    })?;
    let expected: Vec<String> = sources.iter().map(|s| s.entry.clone()).collect();

    if entries != expected {
        return Err(BackupError::step(
            Phase::Pack,
            format!(
                "archive {} contains {:?}, expected {:?}",
                archive_path.display(),
                entries,
                expected
            ),
        ));
    }
    Ok(())
}
