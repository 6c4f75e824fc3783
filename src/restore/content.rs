// nachweisbackup/src/restore/content.rs
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::backup::archive::CONTENT_DIRS;
use crate::errors::{BackupError, Phase, Result};
use crate::utils::copy_dir_all;

/// Replaces each production content directory with the copy found in
/// `extracted`. Directories the archive does not contain are left alone.
///
/// Returns the names of the directories that were replaced.
pub fn swap_content_dirs(extracted: &Path, backend_root: &Path) -> Result<Vec<String>> {
    let mut swapped = Vec::new();

    for dir in CONTENT_DIRS {
        let source = extracted.join(dir);
        if !source.is_dir() {
            debug!(directory = dir, "not in archive, keeping production copy");
            continue;
        }

        let target = backend_root.join(dir);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| {
                BackupError::io(Some(Phase::Swap), format!("removing {}", target.display()), e)
            })?;
        }
        let files = copy_dir_all(&source, &target).map_err(|e| {
            BackupError::io(
                Some(Phase::Swap),
                format!("copying {} into {}", dir, target.display()),
                e,
            )
        })?;

        info!(directory = dir, files, "✓ content directory restored");
        swapped.push(dir.to_string());
    }

    Ok(swapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_replaces_present_and_keeps_absent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let extracted = dir.path().join("extracted");
        let backend = dir.path().join("backend");

        fs::create_dir_all(extracted.join("uploads"))?;
        fs::write(extracted.join("uploads/x.txt"), b"hello")?;
        fs::create_dir_all(backend.join("uploads"))?;
        fs::write(backend.join("uploads/stale.txt"), b"old")?;
        fs::create_dir_all(backend.join("generated_pdfs"))?;
        fs::write(backend.join("generated_pdfs/keep.pdf"), b"%PDF")?;

        let swapped = swap_content_dirs(&extracted, &backend)?;

        assert_eq!(swapped, vec!["uploads"]);
        assert_eq!(fs::read(backend.join("uploads/x.txt"))?, b"hello");
        assert!(!backend.join("uploads/stale.txt").exists());
        assert_eq!(fs::read(backend.join("generated_pdfs/keep.pdf"))?, b"%PDF");
        Ok(())
    }

    #[test]
    fn test_swap_creates_missing_production_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let extracted = dir.path().join("extracted");
        fs::create_dir_all(extracted.join("generated_pdfs"))?;
        fs::write(extracted.join("generated_pdfs/a.pdf"), [0x25, 0x50, 0x44, 0x46])?;

        let backend = dir.path().join("backend");
        let swapped = swap_content_dirs(&extracted, &backend)?;

        assert_eq!(swapped, vec!["generated_pdfs"]);
        assert_eq!(
            fs::read(backend.join("generated_pdfs/a.pdf"))?,
            vec![0x25, 0x50, 0x44, 0x46]
        );
        Ok(())
    }
}
