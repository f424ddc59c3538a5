//! Error taxonomy for the rotator.
//!
//! Space and tool errors abort a cycle. Metadata and per-step rotation errors
//! are recovered where they happen and only logged or collected.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RotatorError {
    #[error("Insufficient free space: {available} bytes available, {required} bytes required")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Unreadable backup metadata {}: {reason}", path.display())]
    MetadataParse { path: PathBuf, reason: String },

    #[error("Rotation step failed ({action}): {source}")]
    RotationStep {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup tool failed: '{command}' exited with {status}")]
    BackupTool {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("Backup tool timed out after {timeout_secs}s: '{command}'")]
    ToolTimeout { command: String, timeout_secs: u64 },

    #[error("Cycle cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl RotatorError {
    /// Errors that end the current cycle and must reach the operator.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RotatorError::MetadataParse { .. } | RotatorError::RotationStep { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RotatorError>;
