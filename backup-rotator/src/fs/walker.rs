//! Directory traversal for usage accounting and tier copies.
//!
//! Walks never follow symbolic links. Usage accounting counts every inode
//! once, so generations that share files through hard links are not
//! double-counted.

use std::collections::HashSet;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Calculate the apparent size of all regular files under `root`.
///
/// Hard-linked paths are counted once. Entries that cannot be read or
/// stat'ed are skipped; a missing root yields 0.
///
/// # Example
/// ```no_run
/// use backup_rotator::fs::walker::used_bytes;
/// use std::path::Path;
///
/// let used = used_bytes(Path::new("/srv/backups"));
/// println!("{} bytes under backup root", used);
/// ```
pub fn used_bytes(root: &Path) -> u64 {
    let mut seen = HashSet::new();
    let mut total = 0u64;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                let path = entry.path().display();
                debug!(path = %path, error = %e, "Skipping file without metadata");
                continue;
            }
        };

        if seen.insert((metadata.dev(), metadata.ino())) {
            total += metadata.len();
        }
    }

    total
}

/// Recursively copy `src` into a new directory `dst`.
///
/// Fails with `AlreadyExists` when `dst` is present and with `NotFound` when
/// `src` is not a directory. Symbolic links are recreated, not followed.
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    if !src.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory {} does not exist", src.display()),
        ));
    }
    if dst.symlink_metadata().is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination {} already exists", dst.display()),
        ));
    }

    let mut copied = 0u64;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(src).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
        })?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Move `src` to `dst`, copying and removing when they live on different
/// filesystems.
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.symlink_metadata().is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination {} already exists", dst.display()),
        ));
    }

    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32) => {
            if src.is_dir() {
                copy_tree(src, dst)?;
                std::fs::remove_dir_all(src)
            } else {
                std::fs::copy(src, dst)?;
                std::fs::remove_file(src)
            }
        }
        Err(e) => Err(e),
    }
}
