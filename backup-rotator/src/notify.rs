//! Operator notifications.
//!
//! Messages are plain text handed to a sendmail-compatible program. Failing
//! to deliver is logged and never escalates.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::NotifyConfig;
use crate::utils::errors::{Result, RotatorError};

/// Delivers plain-text messages to the operators
pub trait Notifier {
    fn notify(&self, body: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Send `body` and log, rather than return, any delivery failure.
pub async fn notify_best_effort<N: Notifier>(notifier: &N, body: &str) {
    if let Err(e) = notifier.notify(body).await {
        error!(error = %e, "Failed to deliver notification");
    }
}

/// Pipes messages into a sendmail-compatible command
#[derive(Debug, Clone)]
pub struct MailNotifier {
    recipients: Vec<String>,
    sender: String,
    mail_command: PathBuf,
}

impl MailNotifier {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            recipients: config.recipients.clone(),
            sender: config.sender.clone().unwrap_or_else(default_sender),
            mail_command: config.mail_command.clone(),
        }
    }

    /// Full message text: headers, blank line, body.
    pub fn compose(&self, body: &str) -> String {
        let now = chrono::Local::now().format("%a, %d %b %Y %H:%M:%S %p");
        format!(
            "Subject: Backup Notification -- {}\nFrom: {}\nTo: {}\n\n{}\n",
            now,
            self.sender,
            self.recipients.join(", "),
            body
        )
    }
}

impl Notifier for MailNotifier {
    async fn notify(&self, body: &str) -> Result<()> {
        if self.recipients.is_empty() {
            warn!("No notification recipients configured; message follows\n{}", body);
            return Ok(());
        }

        let message = self.compose(body);
        let mut child = Command::new(&self.mail_command)
            .arg("-f")
            .arg(&self.sender)
            .args(&self.recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RotatorError::Notification(format!(
                    "cannot run {}: {}",
                    self.mail_command.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(message.as_bytes()).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(RotatorError::Notification(e.to_string()));
                }
                _ => {}
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(RotatorError::Notification(format!(
                "{} exited with {}: {}",
                self.mail_command.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("Email sent to {}", self.recipients.join(", "));
        Ok(())
    }
}

/// `<user>@<hostname>`
fn default_sender() -> String {
    let user = nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| "backup".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}", user, host)
}
