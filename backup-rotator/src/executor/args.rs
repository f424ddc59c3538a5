//! Command-line translation for the external backup and restore tools.
//!
//! Flags come first, then key/value options, matching how scheduled
//! invocations have always been logged.

use std::path::PathBuf;

/// One backup run of the external tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupRequest {
    /// Back up every backend (exclusive with `backend_ids`)
    pub all_backends: bool,

    /// Back up only these backends
    pub backend_ids: Vec<String>,

    pub compress: bool,

    /// Store only changes since `base_id`
    pub incremental: bool,

    pub base_id: Option<String>,

    /// Destination directory, normally `<root>/today`
    pub backup_dir: PathBuf,

    /// Generation id shared by every backend of this run
    pub backup_id: Option<String>,
}

impl BackupRequest {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.all_backends {
            args.push("--backUpAll".to_string());
        }
        if self.compress {
            args.push("--compress".to_string());
        }
        if self.incremental {
            args.push("--incremental".to_string());
        }

        args.push("--backupDirectory".to_string());
        args.push(self.backup_dir.display().to_string());

        if let Some(id) = &self.backup_id {
            args.push("--backupID".to_string());
            args.push(id.clone());
        }
        if let Some(base) = &self.base_id {
            args.push("--incrementalBaseID".to_string());
            args.push(base.clone());
        }
        for backend in &self.backend_ids {
            args.push("--backendID".to_string());
            args.push(backend.clone());
        }

        args
    }
}

/// One restore (or listing / verification) run of the external tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Directory holding the backup to restore
    pub backup_dir: PathBuf,

    pub backup_id: Option<String>,

    /// List the backups in `backup_dir` instead of restoring
    pub list: bool,

    /// Verify the backup without restoring it
    pub dry_run: bool,
}

impl RestoreRequest {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.list {
            args.push("--listBackups".to_string());
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }

        args.push("--backupDirectory".to_string());
        args.push(self.backup_dir.display().to_string());

        if let Some(id) = &self.backup_id {
            args.push("--backupID".to_string());
            args.push(id.clone());
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_backup_args() {
        let request = BackupRequest {
            all_backends: true,
            compress: true,
            backup_dir: PathBuf::from("/srv/backups/today"),
            backup_id: Some("Wed-20240313".into()),
            ..Default::default()
        };

        assert_eq!(
            request.to_args(),
            vec![
                "--backUpAll",
                "--compress",
                "--backupDirectory",
                "/srv/backups/today",
                "--backupID",
                "Wed-20240313",
            ]
        );
    }

    #[test]
    fn test_incremental_named_backends() {
        let request = BackupRequest {
            backend_ids: vec!["userRoot".into(), "changelog".into()],
            incremental: true,
            base_id: Some("Wed-20240313".into()),
            backup_dir: PathBuf::from("/b/today"),
            backup_id: Some("Wed-20240313--14".into()),
            ..Default::default()
        };

        assert_eq!(
            request.to_args(),
            vec![
                "--incremental",
                "--backupDirectory",
                "/b/today",
                "--backupID",
                "Wed-20240313--14",
                "--incrementalBaseID",
                "Wed-20240313",
                "--backendID",
                "userRoot",
                "--backendID",
                "changelog",
            ]
        );
    }

    #[test]
    fn test_restore_args() {
        let request = RestoreRequest {
            backup_dir: PathBuf::from("/b/daily/20240312/userRoot"),
            list: true,
            ..Default::default()
        };
        assert_eq!(
            request.to_args(),
            vec!["--listBackups", "--backupDirectory", "/b/daily/20240312/userRoot"]
        );
    }
}
