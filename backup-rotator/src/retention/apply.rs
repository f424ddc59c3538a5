//! Carry out a [`RotationPlan`] against the backup root.
//!
//! Every action is attempted, in order, regardless of earlier failures.
//! Failures are collected into the [`RotationReport`] instead of aborting;
//! the next cycle corrects whatever was left behind.

use std::io;
use std::path::Path;
use tracing::{info, warn};

use super::{Action, RotationPlan, Tier};
use crate::fs::walker::{copy_tree, move_path};
use crate::utils::errors::RotatorError;

/// What happened to each action of a plan
#[derive(Debug, Default)]
pub struct RotationReport {
    pub completed: Vec<Action>,
    pub failures: Vec<RotatorError>,
}

impl RotationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human-readable list of failed steps, one per line.
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Execute `plan` under `root`.
pub fn apply_plan(root: &Path, plan: &RotationPlan) -> RotationReport {
    let mut report = RotationReport::default();

    for action in &plan.actions {
        match apply_action(root, action) {
            Ok(()) => {
                info!("Rotation: {}", action);
                report.completed.push(action.clone());
            }
            Err(source) => {
                warn!(error = %source, "Rotation step failed: {}", action);
                report.failures.push(RotatorError::RotationStep {
                    action: action.to_string(),
                    source,
                });
            }
        }
    }

    info!(
        completed = report.completed.len(),
        failed = report.failures.len(),
        "Rotation finished for {}",
        plan.today
    );
    report
}

fn apply_action(root: &Path, action: &Action) -> io::Result<()> {
    match action {
        Action::Promote { entry, to } => {
            let target_dir = to.path(root);
            std::fs::create_dir_all(&target_dir)?;
            move_path(&Tier::Today.path(root).join(entry), &target_dir.join(entry))
        }
        Action::Copy { from, to } => {
            copy_tree(&from.path(root), &to.path(root)).map(|_| ())
        }
        Action::Delete { folder, .. } => match std::fs::remove_dir_all(folder.path(root)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::{DeleteReason, FolderRef};
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn plan(actions: Vec<Action>) -> RotationPlan {
        RotationPlan {
            today: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            actions,
            ignored: Vec::new(),
        }
    }

    #[test]
    fn test_failed_step_does_not_stop_later_steps() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("daily/20240301"))?;

        let actions = vec![
            Action::Copy {
                from: FolderRef::new(Tier::Daily, "20240309"),
                to: FolderRef::new(Tier::Weekly, "20240309-10"),
            },
            Action::Delete {
                folder: FolderRef::new(Tier::Daily, "20240301"),
                reason: DeleteReason::DailyExpired,
            },
        ];
        let report = apply_plan(root, &plan(actions));

        assert_eq!(report.failures.len(), 1);
        assert!(report.failure_summary().contains("copy daily/20240309 -> weekly/20240309-10"));
        assert_eq!(report.completed.len(), 1);
        assert!(!root.join("daily/20240301").exists());
        Ok(())
    }

    #[test]
    fn test_delete_of_missing_folder_is_not_a_failure() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let report = apply_plan(
            temp_dir.path(),
            &plan(vec![Action::Delete {
                folder: FolderRef::new(Tier::Monthly, "202303"),
                reason: DeleteReason::MonthlyExpired,
            }]),
        );
        assert!(report.is_clean());
        Ok(())
    }

    #[test]
    fn test_promote_and_copy() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("today/userRoot"))?;
        fs::write(root.join("today/userRoot/backup.info"), b"ds-cfg-backend-id=userRoot\n")?;

        let daily = FolderRef::new(Tier::Daily, "20240309");
        let report = apply_plan(
            root,
            &plan(vec![
                Action::Promote {
                    entry: "userRoot".into(),
                    to: daily.clone(),
                },
                Action::Copy {
                    from: daily,
                    to: FolderRef::new(Tier::Weekly, "20240309-10"),
                },
            ]),
        );

        assert!(report.is_clean());
        assert!(!root.join("today/userRoot").exists());
        assert!(root.join("daily/20240309/userRoot/backup.info").is_file());
        assert!(root.join("weekly/20240309-10/userRoot/backup.info").is_file());
        Ok(())
    }

    #[test]
    fn test_promote_refuses_to_overwrite() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("today/userRoot"))?;
        fs::create_dir_all(root.join("daily/20240309/userRoot"))?;

        let report = apply_plan(
            root,
            &plan(vec![Action::Promote {
                entry: "userRoot".into(),
                to: FolderRef::new(Tier::Daily, "20240309"),
            }]),
        );

        assert_eq!(report.failures.len(), 1);
        assert!(root.join("today/userRoot").exists());
        Ok(())
    }
}
