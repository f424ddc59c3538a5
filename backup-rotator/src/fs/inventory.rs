//! Backup inventory: discovers `backup.info` metadata files under a root.
//!
//! Each metadata file names one backend and lists one or more backups as
//! consecutive `backup_id=` / `backup_date=` / `incremental=` lines. The scan
//! is best effort: unreadable or malformed files are logged and skipped.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::utils::errors::RotatorError;

/// Name of the per-backend metadata file written by the backup tool
pub const METADATA_FILE: &str = "backup.info";

const BACKEND_KEY: &str = "ds-cfg-backend-id=";
const BACKUP_ID_KEY: &str = "backup_id=";
const BACKUP_DATE_KEY: &str = "backup_date=";
const INCREMENTAL_KEY: &str = "incremental=";

/// One discovered backup of one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    /// Backend that was backed up
    pub backend_id: String,

    /// Directory containing the metadata file
    pub location: PathBuf,

    /// Identifier shared by every backend backed up in the same run
    pub generation_id: String,

    /// When the backup was taken
    pub created_at: DateTime<Utc>,

    pub is_incremental: bool,
}

impl BackupRecord {
    /// The generation folder: parent of the backend directory.
    pub fn generation_dir(&self) -> Option<&Path> {
        self.location.parent()
    }
}

/// Backups grouped by generation folder
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub folder: PathBuf,
    pub generation_ids: BTreeSet<String>,
    pub backends: BTreeSet<String>,
    pub newest: DateTime<Utc>,
}

/// Walk `root` and collect every backup listed in a `backup.info` file.
///
/// Order follows the directory walk; sort explicitly when order matters.
pub fn scan(root: &Path) -> Vec<BackupRecord> {
    let mut records = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() || entry.file_name() != METADATA_FILE {
            continue;
        }

        match read_metadata_file(entry.path()) {
            Ok(mut found) => records.append(&mut found),
            Err(e) => warn!("{}", e),
        }
    }

    debug!(count = records.len(), root = %root.display(), "Inventory scan finished");
    records
}

fn read_metadata_file(path: &Path) -> Result<Vec<BackupRecord>, RotatorError> {
    let content = std::fs::read_to_string(path).map_err(|e| RotatorError::MetadataParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let location = path.parent().unwrap_or(path);
    parse_backup_info(&content, location).map_err(|reason| RotatorError::MetadataParse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parse the contents of one `backup.info` file found in `location`.
pub fn parse_backup_info(content: &str, location: &Path) -> Result<Vec<BackupRecord>, String> {
    let lines: Vec<&str> = content.lines().map(str::trim_end).collect();

    let backend_id = lines
        .iter()
        .find_map(|line| line.strip_prefix(BACKEND_KEY))
        .map(str::trim)
        .filter(|id| is_word(id))
        .ok_or_else(|| format!("no valid '{}' line", BACKEND_KEY.trim_end_matches('=')))?;

    let mut records = Vec::new();

    for window in lines.windows(3) {
        let (Some(id), Some(date), Some(incremental)) = (
            window[0].strip_prefix(BACKUP_ID_KEY),
            window[1].strip_prefix(BACKUP_DATE_KEY),
            window[2].strip_prefix(INCREMENTAL_KEY),
        ) else {
            continue;
        };

        if !is_word(id) {
            continue;
        }

        let is_incremental = match incremental {
            "true" => true,
            "false" => false,
            _ => continue,
        };

        let Some(created_at) = parse_backup_date(date) else {
            debug!(backup_id = id, date, "Skipping backup with unparseable date");
            continue;
        };

        records.push(BackupRecord {
            backend_id: backend_id.to_string(),
            location: location.to_path_buf(),
            generation_id: id.to_string(),
            created_at,
            is_incremental,
        });
    }

    Ok(records)
}

/// Parse a generalized-time stamp such as `20240131235959Z`.
pub fn parse_backup_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim().trim_end_matches('Z');
    ["%Y%m%d%H%M%S", "%Y%m%d%H%M%S%.3f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn is_word(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Group records by generation folder, sorted by folder path.
pub fn summarize(records: &[BackupRecord]) -> Vec<GenerationSummary> {
    let mut groups: BTreeMap<PathBuf, GenerationSummary> = BTreeMap::new();

    for record in records {
        let Some(folder) = record.generation_dir() else {
            continue;
        };

        let summary = groups
            .entry(folder.to_path_buf())
            .or_insert_with(|| GenerationSummary {
                folder: folder.to_path_buf(),
                generation_ids: BTreeSet::new(),
                backends: BTreeSet::new(),
                newest: record.created_at,
            });
        summary.generation_ids.insert(record.generation_id.clone());
        summary.backends.insert(record.backend_id.clone());
        summary.newest = summary.newest.max(record.created_at);
    }

    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
ds-cfg-backend-id=userRoot
backup_id=Mon20240101
backup_date=20240101000512Z
incremental=false
compressed=true
backup_id=Mon20240101h01
backup_date=20240101013000Z
incremental=true
";

    #[test]
    fn test_parse_backup_info() {
        let records = parse_backup_info(SAMPLE, Path::new("/b/daily/20240101/userRoot")).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].backend_id, "userRoot");
        assert_eq!(records[0].generation_id, "Mon20240101");
        assert_eq!(
            records[0].created_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 12).unwrap()
        );
        assert!(!records[0].is_incremental);
        assert!(records[1].is_incremental);
        assert_eq!(
            records[1].generation_dir(),
            Some(Path::new("/b/daily/20240101"))
        );
    }

    #[test]
    fn test_parse_requires_backend() {
        let content = "backup_id=a\nbackup_date=20240101000000Z\nincremental=false\n";
        let err = parse_backup_info(content, Path::new("/x")).unwrap_err();
        assert!(err.contains("ds-cfg-backend-id"));
    }

    #[test]
    fn test_parse_skips_broken_triples() {
        let content = "\
ds-cfg-backend-id=changelog
backup_id=first
backup_date=not-a-date
incremental=false
backup_id=second
incremental=true
backup_id=third
backup_date=20240302101010Z
incremental=maybe
backup_id=fourth
backup_date=20240302101010.250Z
incremental=true
";
        let records = parse_backup_info(content, Path::new("/x/changelog")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].generation_id, "fourth");
    }

    #[test]
    fn test_scan_tree() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let user_root = root.join("daily/20240101/userRoot");
        let changelog = root.join("daily/20240101/changelog");
        let broken = root.join("daily/20240102/userRoot");
        for dir in [&user_root, &changelog, &broken] {
            fs::create_dir_all(dir)?;
        }
        fs::write(user_root.join(METADATA_FILE), SAMPLE)?;
        fs::write(
            changelog.join(METADATA_FILE),
            SAMPLE.replace("userRoot", "changelog"),
        )?;
        fs::write(broken.join(METADATA_FILE), "garbage")?;
        fs::write(root.join("daily/20240101/notes.txt"), "backup_id=x")?;

        let mut records = scan(root);
        records.sort_by(|a, b| (&a.backend_id, a.created_at).cmp(&(&b.backend_id, b.created_at)));

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].backend_id, "changelog");
        assert_eq!(records[0].location, changelog);

        let summaries = summarize(&records);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].folder, root.join("daily/20240101"));
        assert_eq!(summaries[0].backends.len(), 2);
        assert_eq!(summaries[0].generation_ids.len(), 2);
        assert_eq!(
            summaries[0].newest,
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 30, 0).unwrap()
        );
        Ok(())
    }

    #[test]
    fn test_scan_missing_root() {
        assert!(scan(Path::new("/nonexistent/backups")).is_empty());
    }
}
