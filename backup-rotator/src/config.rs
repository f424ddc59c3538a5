//! Configuration management for the rotator.
//!
//! Two sources:
//! - `~/.backup_config`: the three-line retention file written by `setup` and
//!   read by every rotation cycle (root, minimum free bytes, generation cap).
//! - an optional TOML file with logging, notification and tool settings.

use crate::retention::MonthlyExpiry;
use crate::utils::errors::{Result, RotatorError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the retention file inside the home directory.
pub const RETENTION_FILE_NAME: &str = ".backup_config";

/// Generation cap used when `setup` is not given one.
pub const DEFAULT_MAX_GENERATIONS: usize = 10;

/// Free-space floor used when the backup root is not on the root device.
pub const DEFAULT_FREE_SPACE: &str = "200M";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub tool: ToolConfig,

    #[serde(default)]
    pub retention: RetentionPolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append-only cycle log
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Operator addresses; empty means notifications are only logged
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Sender address (default: `<user>@<hostname>`)
    #[serde(default)]
    pub sender: Option<String>,

    /// sendmail-compatible program that reads the message on stdin
    #[serde(default = "default_mail_command")]
    pub mail_command: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Program invoked for `backup`
    #[serde(default = "default_backup_program")]
    pub backup_program: String,

    /// Program invoked for `restore`
    #[serde(default = "default_restore_program")]
    pub restore_program: String,

    /// Upper bound for one tool run in seconds (0 disables)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionPolicyConfig {
    #[serde(default)]
    pub monthly_expiry: MonthlyExpiry,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<PathBuf> {
    home_dir().map(|home| home.join("backup.log"))
}

fn default_mail_command() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

fn default_backup_program() -> String {
    "backup".to_string()
}

fn default_restore_program() -> String {
    "restore".to_string()
}

fn default_timeout_secs() -> u64 {
    12 * 60 * 60
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            sender: None,
            mail_command: default_mail_command(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            backup_program: default_backup_program(),
            restore_program: default_restore_program(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RotatorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Retention settings shared by setup and every rotation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Absolute path of the backup root holding the tier directories
    pub root: PathBuf,

    /// Minimum free bytes that must remain on the root's filesystem
    pub min_free_bytes: u64,

    /// Maximum number of generation folders across all tiers
    pub max_generations: usize,
}

impl RetentionConfig {
    /// `$HOME/.backup_config`
    pub fn default_path() -> Result<PathBuf> {
        home_dir()
            .map(|home| home.join(RETENTION_FILE_NAME))
            .ok_or_else(|| RotatorError::Config("HOME is not set".into()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RotatorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse the three-line format: root, free bytes, generation cap.
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines().map(str::trim);

        let root = match lines.next() {
            Some(line) if !line.is_empty() => PathBuf::from(line),
            _ => return Err(RotatorError::Config("missing backup root".into())),
        };
        if !root.is_absolute() {
            return Err(RotatorError::Config(format!(
                "backup root must be absolute: {}",
                root.display()
            )));
        }

        let min_free_bytes = lines
            .next()
            .ok_or_else(|| RotatorError::Config("missing free space threshold".into()))?
            .parse::<u64>()
            .map_err(|e| RotatorError::Config(format!("invalid free space threshold: {}", e)))?;

        let max_generations = lines
            .next()
            .ok_or_else(|| RotatorError::Config("missing maximum generation count".into()))?
            .parse::<usize>()
            .map_err(|e| RotatorError::Config(format!("invalid maximum generation count: {}", e)))?;
        if max_generations == 0 {
            return Err(RotatorError::Config("maximum generation count must be at least 1".into()));
        }

        Ok(Self {
            root,
            min_free_bytes,
            max_generations,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}\n",
            self.root.display(),
            self.min_free_bytes,
            self.max_generations
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

/// Parse a size such as `200M` or `2g` into bytes (binary multiples).
pub fn parse_size(input: &str) -> Result<u64> {
    let input = input.trim().to_ascii_uppercase();
    let invalid = || {
        RotatorError::Config(format!(
            "invalid size '{}': expected <number>M or <number>G",
            input
        ))
    };

    let (digits, multiplier) = if let Some(d) = input.strip_suffix('M') {
        (d, 1024u64 * 1024)
    } else if let Some(d) = input.strip_suffix('G') {
        (d, 1024u64 * 1024 * 1024)
    } else {
        return Err(invalid());
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

/// Free-space floor when none was given: mandatory on the system partition,
/// [`DEFAULT_FREE_SPACE`] elsewhere.
#[cfg(unix)]
pub fn default_free_space(backup_root: &Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;

    let root_dev = std::fs::metadata(backup_root)?.dev();
    let system_dev = std::fs::metadata("/")?.dev();
    if root_dev == system_dev {
        return Err(RotatorError::Config(
            "a free space threshold must be given when the backup root shares a partition \
             with the operating system"
                .into(),
        ));
    }
    parse_size(DEFAULT_FREE_SPACE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retention_file() {
        let config = RetentionConfig::parse("/srv/backups\n209715200\n10\n").unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/backups"));
        assert_eq!(config.min_free_bytes, 209_715_200);
        assert_eq!(config.max_generations, 10);
    }

    #[test]
    fn test_retention_file_roundtrip() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join(RETENTION_FILE_NAME);
        let config = RetentionConfig {
            root: PathBuf::from("/data/ds-backups"),
            min_free_bytes: 1024,
            max_generations: 30,
        };
        config.save(&path)?;
        assert_eq!(RetentionConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_retention_file_rejects_bad_input() {
        assert!(RetentionConfig::parse("").is_err());
        assert!(RetentionConfig::parse("relative/path\n1\n1\n").is_err());
        assert!(RetentionConfig::parse("/srv\nlots\n10\n").is_err());
        assert!(RetentionConfig::parse("/srv\n100\n").is_err());
        assert!(RetentionConfig::parse("/srv\n100\n0\n").is_err());
        assert!(matches!(
            RetentionConfig::load(Path::new("/nonexistent/.backup_config")),
            Err(RotatorError::Config(_))
        ));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("200M").unwrap(), 200 * 1024 * 1024);
        assert_eq!(parse_size("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("200").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("12K").is_err());
        assert!(parse_size("-5M").is_err());
    }

    #[test]
    fn test_toml_defaults() {
        let config: Config = toml::from_str(
            r#"
            [notify]
            recipients = ["ops@example.com"]

            [tool]
            timeout_secs = 0

            [retention]
            monthly_expiry = "month_slot"
            "#,
        )
        .unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.notify.recipients, vec!["ops@example.com".to_string()]);
        assert_eq!(config.notify.mail_command, PathBuf::from("/usr/sbin/sendmail"));
        assert_eq!(config.tool.backup_program, "backup");
        assert!(config.tool.timeout().is_none());
        assert_eq!(config.retention.monthly_expiry, MonthlyExpiry::MonthSlot);
    }
}
