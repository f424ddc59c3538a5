//! Backup Rotator - Main entry point
//!
//! Scheduled daily/hourly backups with tiered retention.

use anyhow::{bail, Context, Result};
use backup_rotator::{
    config::{self, Config, RetentionConfig, DEFAULT_MAX_GENERATIONS},
    cycle::{self, BackupCycle},
    daemon::{
        crontab::{Cadence, CrontabScheduler, ScheduledCommand},
        shutdown::ShutdownCoordinator,
    },
    executor::{BackupRequest, BackupTool, RestoreRequest, ToolExecutor},
    fs::{inventory, space, walker},
    notify::{MailNotifier, Notifier},
    retention::{self, RotationMode},
    utils,
};
use chrono::{Local, NaiveDate};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Append logs to this file (overrides config)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check space, rotate generations and run the backup tool
    Backup(BackupArgs),

    /// Check space and rotate generations without backing up
    Rotate {
        /// Rotate as if today were this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print the plan without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Only enforce the generation cap
        #[arg(long)]
        cap_only: bool,
    },

    /// Restore, list or verify a backup with the restore tool
    Restore {
        #[arg(short = 'd', long)]
        backup_dir: PathBuf,

        #[arg(short = 'I', long)]
        backup_id: Option<String>,

        /// List the backups in the directory
        #[arg(short, long)]
        list: bool,

        /// Verify without restoring
        #[arg(short = 'N', long)]
        dry_run: bool,
    },

    /// List the backups found under the backup root
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show used and available space of the backup root
    Usage,

    /// Write the retention file, create the tiers, schedule jobs and take a first backup
    Setup {
        /// Backup root (absolute)
        root: PathBuf,

        /// Minimum free space such as 200M or 2G
        #[arg(short, long)]
        free_space: Option<String>,

        /// Maximum number of generations kept
        #[arg(short, long, default_value_t = DEFAULT_MAX_GENERATIONS)]
        max: usize,

        /// Jobs to register
        #[arg(short, long, value_enum, default_values_t = [Schedule::Daily])]
        schedule: Vec<Schedule>,

        /// Skip the initial backup
        #[arg(long)]
        no_backup: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct BackupArgs {
    /// Back up every backend
    #[arg(short, long, conflicts_with = "backend")]
    all: bool,

    /// Back up this backend (repeatable)
    #[arg(short = 'n', long)]
    backend: Vec<String>,

    #[arg(short, long)]
    compress: bool,

    /// Incremental backup on top of --base-id
    #[arg(short, long, requires = "base_id")]
    incremental: bool,

    #[arg(short = 'B', long)]
    base_id: Option<String>,

    #[arg(short = 'd', long)]
    backup_dir: PathBuf,

    #[arg(short = 'I', long)]
    backup_id: Option<String>,

    /// Rotate before backing up (default when not run from a terminal)
    #[arg(long, conflicts_with = "no_rotate")]
    rotate: bool,

    #[arg(long)]
    no_rotate: bool,
}

impl BackupArgs {
    fn request(&self) -> BackupRequest {
        BackupRequest {
            all_backends: self.all,
            backend_ids: self.backend.clone(),
            compress: self.compress,
            incremental: self.incremental,
            base_id: self.base_id.clone(),
            backup_dir: self.backup_dir.clone(),
            backup_id: self.backup_id.clone(),
        }
    }

    fn should_rotate(&self) -> bool {
        if self.rotate {
            true
        } else if self.no_rotate {
            false
        } else {
            !std::io::stdout().is_terminal()
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Schedule {
    Daily,
    Hourly,
}

impl From<Schedule> for Cadence {
    fn from(schedule: Schedule) -> Self {
        match schedule {
            Schedule::Daily => Cadence::Daily,
            Schedule::Hourly => Cadence::Hourly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    let log_file = args.log_file.as_ref().or(config.log.file.as_ref());
    utils::logger::init(log_level, log_file.map(PathBuf::as_path))?;

    tracing::debug!("backup-rotator v{}", env!("CARGO_PKG_VERSION"));

    // Signals cancel an in-flight tool run
    let (cancel, signal_listener) = ShutdownCoordinator::new().spawn_listener();
    let tool = ToolExecutor::with_cancel(&config.tool, cancel);
    let notifier = MailNotifier::from_config(&config.notify);

    let result = match args.command {
        Command::Backup(backup) => {
            let cycle = BackupCycle::new(
                load_retention()?,
                config.retention.monthly_expiry,
                tool,
                notifier,
            );
            let today = Local::now().date_naive();
            cycle
                .run_cycle(&backup.request(), backup.should_rotate(), today)
                .await
                .map(|_| ())
                .context("backup cycle failed")
        }
        Command::Rotate {
            date,
            dry_run,
            cap_only,
        } => {
            let cycle = BackupCycle::new(
                load_retention()?,
                config.retention.monthly_expiry,
                tool,
                notifier,
            );
            let today = date.unwrap_or_else(|| Local::now().date_naive());
            let mode = if cap_only {
                RotationMode::CapOnly
            } else {
                RotationMode::Full
            };
            rotate(&cycle, today, mode, dry_run).await
        }
        Command::Restore {
            backup_dir,
            backup_id,
            list,
            dry_run,
        } => {
            let request = RestoreRequest {
                backup_dir,
                backup_id,
                list,
                dry_run,
            };
            tool.restore(&request)
                .await
                .map(|output| print!("{}", output.stdout))
                .context("restore failed")
        }
        Command::List { json } => list(&load_retention()?.root, json).await,
        Command::Usage => usage(&load_retention()?).await,
        Command::Setup {
            root,
            free_space,
            max,
            schedule,
            no_backup,
        } => {
            let cadences: Vec<Cadence> = schedule.into_iter().map(Cadence::from).collect();
            setup(&config, root, free_space, max, &cadences, !no_backup, tool, notifier).await
        }
    };

    signal_listener.abort();

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

fn load_retention() -> Result<RetentionConfig> {
    let path = RetentionConfig::default_path()?;
    RetentionConfig::load(&path)
        .with_context(|| format!("run `setup` first to create {}", path.display()))
}

async fn rotate<T: BackupTool, N: Notifier>(
    cycle: &BackupCycle<T, N>,
    today: NaiveDate,
    mode: RotationMode,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        let plan = cycle.plan(today, mode).await?;
        if plan.is_empty() {
            println!("Nothing to do for {}", today);
        }
        for action in &plan.actions {
            println!("{}", action);
        }
        for folder in &plan.ignored {
            println!("ignored {}", folder);
        }
        return Ok(());
    }

    let (_, report) = cycle.run_rotation(today, mode).await?;
    tracing::info!(
        completed = report.completed.len(),
        failed = report.failures.len(),
        "Rotation finished"
    );
    Ok(())
}

async fn list(root: &Path, json: bool) -> Result<()> {
    let root = root.to_path_buf();
    let mut records = tokio::task::spawn_blocking(move || inventory::scan(&root)).await?;
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for record in &records {
        println!(
            "{}  {:<20} {:<12} {:<5} {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.generation_id,
            record.backend_id,
            if record.is_incremental { "incr" } else { "full" },
            record.location.display()
        );
    }
    Ok(())
}

async fn usage(retention: &RetentionConfig) -> Result<()> {
    let root = retention.root.clone();
    let (used, available) = tokio::task::spawn_blocking(move || {
        let stats = space::FsStats::for_path(&root)?;
        Ok::<_, backup_rotator::RotatorError>((walker::used_bytes(&root), stats.available_bytes()))
    })
    .await??;

    println!("root:      {}", retention.root.display());
    println!("used:      {} MB", used / (1024 * 1024));
    println!("available: {} MB", available / (1024 * 1024));
    println!("required:  {} MB", retention.min_free_bytes / (1024 * 1024));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn setup(
    config: &Config,
    root: PathBuf,
    free_space: Option<String>,
    max_generations: usize,
    cadences: &[Cadence],
    initial_backup: bool,
    tool: ToolExecutor,
    notifier: MailNotifier,
) -> Result<()> {
    if !root.is_absolute() {
        bail!("backup root must be an absolute path: {}", root.display());
    }
    if max_generations == 0 {
        bail!("--max must be at least 1");
    }

    retention::ensure_layout(&root)
        .with_context(|| format!("cannot create tier directories under {}", root.display()))?;

    let min_free_bytes = match free_space {
        Some(size) => config::parse_size(&size)?,
        None => config::default_free_space(&root)?,
    };

    let retention = RetentionConfig {
        root: root.clone(),
        min_free_bytes,
        max_generations,
    };
    let path = RetentionConfig::default_path()?;
    retention.save(&path)?;
    tracing::info!("Wrote {}", path.display());

    let program = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.to_str().map(str::to_string))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    let entries: Vec<ScheduledCommand> = cadences
        .iter()
        .map(|&cadence| ScheduledCommand::new(cadence, &program, &root))
        .collect();
    CrontabScheduler::default().register(&entries).await?;

    if !initial_backup {
        return Ok(());
    }

    let cycle = BackupCycle::new(retention, config.retention.monthly_expiry, tool, notifier);
    let now = Local::now();
    let request = BackupRequest {
        all_backends: true,
        compress: true,
        backup_dir: cycle::today_dir(&root),
        backup_id: Some(now.format("%a-%Y%m%d").to_string()),
        ..Default::default()
    };
    cycle
        .run_cycle(&request, false, now.date_naive())
        .await
        .context("initial backup failed")?;
    Ok(())
}
