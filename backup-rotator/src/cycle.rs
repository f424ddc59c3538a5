//! Backup admission and the rotation/backup cycle.
//!
//! A cycle runs strictly in sequence: free-space check, inventory, rotation,
//! a second free-space check, then the external backup. Free-space and tool
//! failures end the cycle and are sent to the operators. Rotation failures,
//! including an unreadable tier layout, are reported but do not stop the
//! backup.
//!
//! Nothing here serializes concurrent cycles on the same root; the scheduler
//! must not overlap them.

use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::RetentionConfig;
use crate::executor::{BackupRequest, BackupTool, ToolOutput};
use crate::fs::inventory::{self, BackupRecord};
use crate::fs::space::{self, SpaceReport};
use crate::notify::{notify_best_effort, Notifier};
use crate::retention::{
    self, apply_plan, plan_rotation, MonthlyExpiry, RetentionPolicy, RotationMode, RotationPlan,
    RotationReport, TierTree,
};
use crate::utils::errors::{Result, RotatorError};

const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// Result of a completed cycle
#[derive(Debug)]
pub struct CycleOutcome {
    pub space: SpaceReport,
    pub rotation: Option<RotationReport>,
    pub backup: ToolOutput,
}

/// One rotation/backup cycle over a backup root
pub struct BackupCycle<T, N> {
    config: RetentionConfig,
    monthly_expiry: MonthlyExpiry,
    tool: T,
    notifier: N,
}

impl<T: BackupTool, N: Notifier> BackupCycle<T, N> {
    pub fn new(
        config: RetentionConfig,
        monthly_expiry: MonthlyExpiry,
        tool: T,
        notifier: N,
    ) -> Self {
        Self {
            config,
            monthly_expiry,
            tool,
            notifier,
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn policy(&self, mode: RotationMode) -> RetentionPolicy {
        RetentionPolicy {
            max_generations: self.config.max_generations,
            monthly_expiry: self.monthly_expiry,
            mode,
        }
    }

    /// Free-space gate. Failure is notified and returned.
    pub async fn admit(&self) -> Result<SpaceReport> {
        let root = self.config.root.clone();
        let required = self.config.min_free_bytes;

        match blocking(move || space::audit(&root, required)).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let root = self.config.root.display();
                let body = match &e {
                    RotatorError::InsufficientSpace { .. } => {
                        error!(
                            error = %e,
                            "The minimum space specified is not available...cannot continue"
                        );
                        format!(
                            "\n!! Data Store backup failure !!\n\n\
                             There is not enough free space to continue. \
                             Please cleanup {} manually.\n\n{}\n",
                            root, e
                        )
                    }
                    _ => {
                        error!(error = %e, "Unable to check free space...cannot continue");
                        format!(
                            "\n!! Data Store backup failure !!\n\n\
                             Unable to check free space on {}. \
                             Please verify the backup root exists and is mounted.\n\n{}\n",
                            root, e
                        )
                    }
                };
                notify_best_effort(&self.notifier, &body).await;
                Err(e)
            }
        }
    }

    /// Discover backups under the root, sorted by creation time.
    pub async fn inventory(&self) -> Result<Vec<BackupRecord>> {
        let root = self.config.root.clone();
        blocking(move || {
            let mut records = inventory::scan(&root);
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(records)
        })
        .await
    }

    /// Plan a rotation for `today` without touching the tree.
    pub async fn plan(&self, today: NaiveDate, mode: RotationMode) -> Result<RotationPlan> {
        let root = self.config.root.clone();
        let policy = self.policy(mode);
        blocking(move || {
            let tree = TierTree::read(&root)?;
            Ok(plan_rotation(today, &tree, &policy))
        })
        .await
    }

    /// Admission check, then rotation. Step failures are notified, not returned.
    pub async fn run_rotation(
        &self,
        today: NaiveDate,
        mode: RotationMode,
    ) -> Result<(SpaceReport, RotationReport)> {
        let space = self.admit().await?;

        let records = self.inventory().await?;
        let generations = inventory::summarize(&records);
        info!(
            backups = records.len(),
            generations = generations.len(),
            "Inventory before rotation"
        );

        let root = self.config.root.clone();
        let policy = self.policy(mode);
        let rotated = blocking(move || {
            retention::ensure_layout(&root).map_err(|source| RotatorError::RotationStep {
                action: "create tier directories".into(),
                source,
            })?;
            let tree = TierTree::read(&root).map_err(|source| RotatorError::RotationStep {
                action: "read tier directories".into(),
                source,
            })?;
            let plan = plan_rotation(today, &tree, &policy);
            for folder in &plan.ignored {
                warn!("Ignoring folder without a date in its name: {}", folder);
            }
            Ok(apply_plan(&root, &plan))
        })
        .await;

        let report = match rotated {
            Ok(report) => report,
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Rotation skipped, continuing with the backup");
                RotationReport {
                    completed: Vec::new(),
                    failures: vec![e],
                }
            }
            Err(e) => return Err(e),
        };

        if !report.is_clean() {
            let body = format!(
                "!! Data Store Backup Problem !!\n\n\
                 There was an issue with rotating backups:\n\n{}\n",
                report.failure_summary()
            );
            notify_best_effort(&self.notifier, &body).await;
        }

        Ok((space, report))
    }

    /// Full cycle: admission, optional rotation, admission again, backup.
    ///
    /// Incremental requests only enforce the generation cap.
    pub async fn run_cycle(
        &self,
        request: &BackupRequest,
        rotate: bool,
        today: NaiveDate,
    ) -> Result<CycleOutcome> {
        let started = Instant::now();
        info!("{}", SEPARATOR);
        info!("Backup beginning at {}", Local::now().format("%a, %d %b %Y %H:%M:%S %p"));

        let result = self.cycle_steps(request, rotate, today).await;

        let elapsed = started.elapsed().as_secs_f64();
        info!("{}", SEPARATOR);
        match &result {
            Ok(_) => info!(
                "Backup completed at {}\tTotal elapsed time: {:.2} sec",
                Local::now().format("%a, %d %b %Y %H:%M:%S %p"),
                elapsed
            ),
            Err(e) => error!(
                "Backup failed at {}\tTotal elapsed time: {:.2} sec: {}",
                Local::now().format("%a, %d %b %Y %H:%M:%S %p"),
                elapsed,
                e
            ),
        }

        result
    }

    async fn cycle_steps(
        &self,
        request: &BackupRequest,
        rotate: bool,
        today: NaiveDate,
    ) -> Result<CycleOutcome> {
        let mode = if request.incremental {
            RotationMode::CapOnly
        } else {
            RotationMode::Full
        };

        let rotation = if rotate {
            let (_, report) = self.run_rotation(today, mode).await?;
            Some(report)
        } else {
            None
        };

        // Rotation copies consume space; check again right before the backup.
        let space = self.admit().await?;
        info!(
            "Checking size...There are {}MB free...continuing...",
            space.available_bytes / (1024 * 1024)
        );

        let backup = match self.tool.backup(request).await {
            Ok(output) => output,
            Err(e) => {
                let body = match &e {
                    RotatorError::BackupTool {
                        command,
                        stdout,
                        stderr,
                        ..
                    } => format!(
                        "\n'{}':\n\n\nOUTPUT:\n{}\nERROR:\n{}",
                        command, stdout, stderr
                    ),
                    other => format!("\n!! Data Store backup failure !!\n\n{}\n", other),
                };
                notify_best_effort(&self.notifier, &body).await;
                return Err(e);
            }
        };

        Ok(CycleOutcome {
            space,
            rotation,
            backup,
        })
    }
}

/// `<root>/today`, the directory the backup tool writes into.
pub fn today_dir(root: &Path) -> PathBuf {
    retention::Tier::Today.path(root)
}

async fn blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RotatorError::Io(std::io::Error::other(e.to_string())))?
}
