// nachweisbackup/src/utils/mod.rs
#[cfg(test)]
pub(crate) mod testing;

use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;
use walkdir::WalkDir;

/// Removes a directory tree, logging instead of failing on stuck entries.
pub fn remove_dir_best_effort(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(path) {
        warn!(path = %path.display(), error = %e, "failed to remove directory, retrying entry by entry");
        // Deepest entries first so directories are empty by the time they are removed.
        for entry in WalkDir::new(path).contents_first(true).into_iter().flatten() {
            let entry_path = entry.path();
            let result = if entry.file_type().is_dir() {
                fs::remove_dir(entry_path)
            } else {
                fs::remove_file(entry_path)
            };
            if let Err(e) = result {
                warn!(path = %entry_path.display(), error = %e, "failed to delete");
            }
        }
    }
}

/// Recursively copies `source` into `target`, creating `target` if needed.
pub fn copy_dir_all(source: &Path, target: &Path) -> io::Result<u64> {
    fs::create_dir_all(target)?;
    let mut copied_files = 0;

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();
        let relative = path
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let destination = target.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&destination)?;
        } else if file_type.is_file() {
            fs::copy(path, &destination)?;
            copied_files += 1;
        } else if file_type.is_symlink() {
            copy_symlink(path, &destination)?;
        }
    }

    Ok(copied_files)
}

#[cfg(unix)]
fn copy_symlink(path: &Path, destination: &Path) -> io::Result<()> {
    let link_target = fs::read_link(path)?;
    std::os::unix::fs::symlink(link_target, destination)
}

#[cfg(not(unix))]
fn copy_symlink(path: &Path, destination: &Path) -> io::Result<()> {
    fs::copy(path, destination).map(|_| ())
}
