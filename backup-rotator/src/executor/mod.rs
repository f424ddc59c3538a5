//! External backup/restore tool invocation.
//!
//! Translates a [`BackupRequest`] or [`RestoreRequest`] into the tool's
//! command line, runs it as a subprocess and captures its output. A run is
//! bounded by an optional timeout and aborted when the cancellation token
//! fires; the child is killed in both cases.

pub mod args;

use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ToolConfig;
use crate::utils::errors::{Result, RotatorError};

pub use args::{BackupRequest, RestoreRequest};

/// Captured output of a successful tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// The external tool that owns snapshot content
pub trait BackupTool {
    fn backup(&self, request: &BackupRequest) -> impl Future<Output = Result<ToolOutput>> + Send;

    fn restore(&self, request: &RestoreRequest) -> impl Future<Output = Result<ToolOutput>> + Send;
}

/// Runs the configured programs as subprocesses
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    backup_program: String,
    restore_program: String,
    timeout: Option<Duration>,
    cancel_token: CancellationToken,
}

impl ToolExecutor {
    /// Create a new executor (no cancellation support)
    pub fn new(config: &ToolConfig) -> Self {
        Self::with_cancel(config, CancellationToken::new())
    }

    /// Create a new executor with cancellation support
    pub fn with_cancel(config: &ToolConfig, cancel_token: CancellationToken) -> Self {
        Self {
            backup_program: config.backup_program.clone(),
            restore_program: config.restore_program.clone(),
            timeout: config.timeout(),
            cancel_token,
        }
    }
}

impl BackupTool for ToolExecutor {
    async fn backup(&self, request: &BackupRequest) -> Result<ToolOutput> {
        run_tool(&self.backup_program, &request.to_args(), self.timeout, &self.cancel_token).await
    }

    async fn restore(&self, request: &RestoreRequest) -> Result<ToolOutput> {
        run_tool(&self.restore_program, &request.to_args(), self.timeout, &self.cancel_token).await
    }
}

/// Run `program` with `args`, failing on a non-zero exit.
pub async fn run_tool(
    program: &str,
    args: &[String],
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<ToolOutput> {
    let command_line = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    info!("Arguments passed to utility: {}", args.join(" "));

    let start = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RotatorError::BackupTool {
            command: command_line.clone(),
            status: format!("failed to start: {}", e),
            stdout: String::new(),
            stderr: String::new(),
        })?;

    let wait = child.wait_with_output();
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                RotatorError::ToolTimeout {
                    command: command_line.clone(),
                    timeout_secs: limit.as_secs(),
                }
            }),
            None => Ok(wait.await),
        }
    };

    let output = tokio::select! {
        result = bounded => result??,
        _ = cancel.cancelled() => {
            error!(command = %command_line, "Tool run cancelled, child killed");
            return Err(RotatorError::Cancelled);
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let duration = start.elapsed();

    if !output.status.success() {
        error!(
            command = %command_line,
            status = %output.status,
            "Tool failed\nOUTPUT:\n{}\nERROR:\n{}",
            stdout,
            stderr
        );
        return Err(RotatorError::BackupTool {
            command: command_line,
            status: output.status.to_string(),
            stdout,
            stderr,
        });
    }

    if !stdout.trim().is_empty() {
        info!("{}", stdout.trim_end());
    }
    info!(
        "{} completed, total elapsed time: {:.2} sec",
        program,
        duration.as_secs_f64()
    );

    Ok(ToolOutput {
        stdout,
        stderr,
        duration,
    })
}
