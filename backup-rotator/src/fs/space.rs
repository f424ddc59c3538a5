//! Free-space admission check for the backup root.
//!
//! Availability comes from the filesystem's own free-block count with 5%
//! held back for reserved blocks and metadata. The check is a point-in-time
//! reading, not a reservation.

use std::path::Path;
use tracing::info;

use crate::fs::walker::used_bytes;
use crate::utils::errors::{Result, RotatorError};

/// Share of the free blocks considered usable, in percent.
pub const USABLE_PERCENT: u64 = 95;

/// Filesystem statistics relevant to the admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    /// Free blocks, including blocks reserved for the superuser
    pub free_blocks: u64,

    /// Fragment size in bytes (the unit of `free_blocks`)
    pub fragment_size: u64,
}

impl FsStats {
    /// Read statistics for the filesystem holding `path`
    pub fn for_path(path: &Path) -> Result<Self> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
        Ok(Self {
            free_blocks: stat.blocks_free() as u64,
            fragment_size: stat.fragment_size() as u64,
        })
    }

    /// `free_blocks * fragment_size * 0.95`, rounded down.
    pub fn available_bytes(&self) -> u64 {
        let free = self.free_blocks as u128 * self.fragment_size as u128;
        let usable = free * USABLE_PERCENT as u128 / 100;
        u64::try_from(usable).unwrap_or(u64::MAX)
    }
}

/// Outcome of a passed admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceReport {
    pub available_bytes: u64,
    pub used_bytes: u64,
}

/// Compare `stats` against the required free bytes. Equality passes.
pub fn check(stats: FsStats, required_bytes: u64) -> Result<u64> {
    let available = stats.available_bytes();
    if required_bytes <= available {
        Ok(available)
    } else {
        Err(RotatorError::InsufficientSpace {
            required: required_bytes,
            available,
        })
    }
}

/// Check the filesystem holding `root` for at least `required_bytes` free.
pub fn check_free_space(root: &Path, required_bytes: u64) -> Result<u64> {
    check(FsStats::for_path(root)?, required_bytes)
}

/// Run the admission check and report usage under `root` alongside it.
pub fn audit(root: &Path, required_bytes: u64) -> Result<SpaceReport> {
    let available_bytes = check_free_space(root, required_bytes)?;
    let used_bytes = used_bytes(root);

    info!(
        root = %root.display(),
        available_mb = available_bytes / (1024 * 1024),
        used_mb = used_bytes / (1024 * 1024),
        "Free space check passed"
    );

    Ok(SpaceReport {
        available_bytes,
        used_bytes,
    })
}
