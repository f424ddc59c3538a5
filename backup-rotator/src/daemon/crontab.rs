//! Scheduled job registration through the user's crontab.
//!
//! Entries are tagged with a trailing comment so a later `setup` replaces
//! them instead of piling up duplicates.

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use crate::utils::errors::{Result, RotatorError};

pub const DAILY_TAG: &str = "DS BACKUP-DAILY";
pub const HOURLY_TAG: &str = "DS BACKUP-HOURLY";

/// Backup id template for the daily job: `Wed-20240313`
const DAILY_ID: &str = r#""$(date +\%a-\%Y\%m\%d)""#;

/// Backup id template for the hourly job: `Wed-20240313--14`
const HOURLY_ID: &str = r#""$(date +\%a-\%Y\%m\%d--\%H)""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Full backup and rotation at midnight
    Daily,

    /// Incremental backup at half past every hour
    Hourly,
}

impl Cadence {
    pub fn schedule(self) -> &'static str {
        match self {
            Cadence::Daily => "0 0 * * *",
            Cadence::Hourly => "30 * * * *",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Cadence::Daily => DAILY_TAG,
            Cadence::Hourly => HOURLY_TAG,
        }
    }

    /// Command line the scheduler runs for this cadence.
    pub fn command(self, program: &str, root: &Path) -> String {
        let today = root.join("today");
        match self {
            Cadence::Daily => format!(
                "{} backup -a -c -d {} -I {}",
                program,
                today.display(),
                DAILY_ID
            ),
            Cadence::Hourly => format!(
                "{} backup -a -c -d {} -B {} -i -I {}",
                program,
                today.display(),
                DAILY_ID,
                HOURLY_ID
            ),
        }
    }
}

/// One tagged crontab entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledCommand {
    pub cadence: Cadence,
    pub command: String,
}

impl ScheduledCommand {
    pub fn new(cadence: Cadence, program: &str, root: &Path) -> Self {
        Self {
            cadence,
            command: cadence.command(program, root),
        }
    }

    pub fn line(&self) -> String {
        format!("{} {} # {}", self.cadence.schedule(), self.command, self.cadence.tag())
    }
}

fn is_managed(line: &str) -> bool {
    [DAILY_TAG, HOURLY_TAG]
        .iter()
        .any(|tag| line.trim_end().ends_with(&format!("# {}", tag)))
}

/// Replace every managed entry of `existing` with `entries`.
///
/// Unrelated lines are kept in order. A `PATH=` line is prepended when the
/// crontab has none and `path_env` is given.
pub fn merge_crontab(
    existing: &str,
    entries: &[ScheduledCommand],
    path_env: Option<&str>,
) -> String {
    let mut lines: Vec<String> = existing
        .lines()
        .filter(|line| !is_managed(line))
        .map(str::to_string)
        .collect();

    let has_path = lines.iter().any(|line| line.trim_start().starts_with("PATH="));
    if let (false, Some(path)) = (has_path, path_env) {
        lines.insert(0, format!("PATH={}", path));
    }

    lines.extend(entries.iter().map(ScheduledCommand::line));

    let mut merged = lines.join("\n");
    merged.push('\n');
    merged
}

/// Registers scheduled commands with `crontab`
#[derive(Debug, Clone)]
pub struct CrontabScheduler {
    program: String,
}

impl Default for CrontabScheduler {
    fn default() -> Self {
        Self {
            program: "crontab".to_string(),
        }
    }
}

impl CrontabScheduler {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Add or replace the tagged entries in the current user's crontab.
    pub async fn register(&self, entries: &[ScheduledCommand]) -> Result<()> {
        let existing = self.read().await?;
        let path_env = std::env::var("PATH").ok();
        let merged = merge_crontab(&existing, entries, path_env.as_deref());
        self.write(&merged).await?;

        for entry in entries {
            info!(schedule = entry.cadence.schedule(), "Registered '{}'", entry.cadence.tag());
        }
        Ok(())
    }

    async fn read(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-l")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RotatorError::Scheduler(format!("cannot run {}: {}", self.program, e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab") {
            Ok(String::new())
        } else {
            Err(RotatorError::Scheduler(format!(
                "{} -l failed: {}",
                self.program,
                stderr.trim()
            )))
        }
    }

    async fn write(&self, content: &str) -> Result<()> {
        let mut child = Command::new(&self.program)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RotatorError::Scheduler(format!("cannot run {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(RotatorError::Scheduler(format!(
                "{} - failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn root() -> PathBuf {
        PathBuf::from("/srv/backups")
    }

    #[test]
    fn test_daily_line() {
        let entry = ScheduledCommand::new(Cadence::Daily, "backup-rotator", &root());
        assert_eq!(
            entry.line(),
            concat!(
                "0 0 * * * backup-rotator backup -a -c -d /srv/backups/today ",
                r#"-I "$(date +\%a-\%Y\%m\%d)" # DS BACKUP-DAILY"#
            )
        );
    }

    #[test]
    fn test_hourly_command_is_incremental() {
        let entry = ScheduledCommand::new(Cadence::Hourly, "backup-rotator", &root());
        assert!(entry.line().starts_with("30 * * * * "));
        assert!(entry.command.contains(" -i "));
        assert!(entry.command.contains(r#"-B "$(date +\%a-\%Y\%m\%d)""#));
        assert!(entry.line().ends_with("# DS BACKUP-HOURLY"));
    }

    #[test]
    fn test_merge_replaces_managed_entries() {
        let existing = "\
PATH=/usr/bin:/bin
15 3 * * * /usr/local/bin/logrotate-ds
0 0 * * * old-command # DS BACKUP-DAILY
30 * * * * old-hourly # DS BACKUP-HOURLY
";
        let entries = vec![ScheduledCommand::new(Cadence::Daily, "backup-rotator", &root())];
        let merged = merge_crontab(existing, &entries, Some("/opt/bin"));

        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "PATH=/usr/bin:/bin");
        assert_eq!(lines[1], "15 3 * * * /usr/local/bin/logrotate-ds");
        assert!(lines[2].ends_with("# DS BACKUP-DAILY"));
        assert!(!merged.contains("old-command"));
        assert!(!merged.contains("old-hourly"));
    }

    #[test]
    fn test_merge_into_empty_crontab_adds_path() {
        let entries = vec![
            ScheduledCommand::new(Cadence::Daily, "backup-rotator", &root()),
            ScheduledCommand::new(Cadence::Hourly, "backup-rotator", &root()),
        ];
        let merged = merge_crontab("", &entries, Some("/usr/bin"));
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines[0], "PATH=/usr/bin");
        assert_eq!(lines.len(), 3);

        // idempotent
        assert_eq!(merge_crontab(&merged, &entries, Some("/usr/bin")), merged);
    }

    #[tokio::test]
    async fn test_register_fails_without_crontab_program() {
        let scheduler = CrontabScheduler::with_program("/nonexistent/crontab");
        let entries = vec![ScheduledCommand::new(Cadence::Daily, "backup-rotator", &root())];
        assert!(matches!(
            scheduler.register(&entries).await,
            Err(RotatorError::Scheduler(_))
        ));
    }
}
