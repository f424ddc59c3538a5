//! Tiered retention: today → daily → weekly/monthly/yearly.
//!
//! The tier tree on disk is the only state. A rotation is planned as a list
//! of [`Action`]s by the pure [`planner`] and then carried out by [`apply`],
//! which keeps going past failed steps and reports them together.

pub mod apply;
pub mod planner;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use apply::{apply_plan, RotationReport};
pub use planner::plan_rotation;

/// Directory names that are tier containers, never generation folders.
pub const TIER_EXCLUDES: [&str; 5] = ["daily", "weekly", "today", "yearly", "monthly"];

/// One retention bucket under the backup root
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Today,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Today,
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::Yearly,
    ];

    /// Tiers whose children are generation folders
    pub const ARCHIVE: [Tier; 4] = [Tier::Daily, Tier::Weekly, Tier::Monthly, Tier::Yearly];

    pub fn dir_name(self) -> &'static str {
        match self {
            Tier::Today => "today",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
            Tier::Yearly => "yearly",
        }
    }

    pub fn path(self, root: &Path) -> PathBuf {
        root.join(self.dir_name())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// True when `name` ends with one of the tier container names.
pub fn is_tier_container(name: &str) -> bool {
    TIER_EXCLUDES.iter().any(|suffix| name.ends_with(suffix))
}

/// A generation folder: a dated directory directly under a tier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FolderRef {
    pub tier: Tier,
    pub name: String,
}

impl FolderRef {
    pub fn new(tier: Tier, name: impl Into<String>) -> Self {
        Self {
            tier,
            name: name.into(),
        }
    }

    pub fn path(&self, root: &Path) -> PathBuf {
        self.tier.path(root).join(&self.name)
    }
}

impl fmt::Display for FolderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tier, self.name)
    }
}

/// Which `monthly` folder is expired on the last day of a month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthlyExpiry {
    /// Delete `monthly/<YYYY-1><MM>`, keeping twelve calendar months.
    #[default]
    YearAgo,

    /// Delete `monthly/<MM>`, the historical slot-per-month naming.
    MonthSlot,
}

/// How much of the rotation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMode {
    /// Promotion, fan-out, expiry and the generation cap (daily job)
    Full,

    /// Only the generation cap (hourly incremental job)
    CapOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_generations: usize,
    pub monthly_expiry: MonthlyExpiry,
    pub mode: RotationMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    DailyExpired,
    WeeklyExpired,
    MonthlyExpired,
    OverCap,
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeleteReason::DailyExpired => "daily expiry",
            DeleteReason::WeeklyExpired => "weekly expiry",
            DeleteReason::MonthlyExpired => "monthly expiry",
            DeleteReason::OverCap => "generation cap",
        })
    }
}

/// One filesystem mutation of a rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Move `today/<entry>` into the `to` folder
    Promote { entry: String, to: FolderRef },

    /// Copy a whole generation folder into another tier
    Copy { from: FolderRef, to: FolderRef },

    /// Remove a generation folder
    Delete { folder: FolderRef, reason: DeleteReason },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Promote { entry, to } => write!(f, "promote today/{} -> {}", entry, to),
            Action::Copy { from, to } => write!(f, "copy {} -> {}", from, to),
            Action::Delete { folder, reason } => write!(f, "delete {} ({})", folder, reason),
        }
    }
}

/// Actions for one rotation, in execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationPlan {
    pub today: chrono::NaiveDate,
    pub actions: Vec<Action>,

    /// Folders whose names carry no recognizable date
    pub ignored: Vec<FolderRef>,
}

impl RotationPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn deletions(&self) -> impl Iterator<Item = &FolderRef> {
        self.actions.iter().filter_map(|action| match action {
            Action::Delete { folder, .. } => Some(folder),
            _ => None,
        })
    }
}

/// Snapshot of the tier directories: entries of `today` and the generation
/// folders of the other tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierTree {
    pub today: BTreeSet<String>,
    folders: BTreeMap<Tier, BTreeSet<String>>,
}

impl TierTree {
    /// Read the tree under `root`. Missing tier directories read as empty.
    pub fn read(root: &Path) -> io::Result<Self> {
        let mut tree = TierTree::default();

        for tier in Tier::ALL {
            let dir = tier.path(root);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(tier = %tier, "Tier directory missing, treating as empty");
                    continue;
                }
                Err(e) => return Err(e),
            };

            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                if tier == Tier::Today {
                    tree.today.insert(name);
                } else if entry.file_type()?.is_dir() {
                    tree.insert(&FolderRef::new(tier, name));
                }
            }
        }

        Ok(tree)
    }

    /// Build a tree from `(tier, name)` pairs; `Tier::Today` pairs become
    /// entries of `today`.
    pub fn from_folders<'a>(folders: impl IntoIterator<Item = (Tier, &'a str)>) -> Self {
        let mut tree = TierTree::default();
        for (tier, name) in folders {
            match tier {
                Tier::Today => {
                    tree.today.insert(name.to_string());
                }
                _ => tree.insert(&FolderRef::new(tier, name)),
            }
        }
        tree
    }

    pub fn names(&self, tier: Tier) -> impl Iterator<Item = &str> {
        self.folders
            .get(&tier)
            .into_iter()
            .flat_map(|names| names.iter().map(String::as_str))
    }

    pub fn contains(&self, folder: &FolderRef) -> bool {
        self.folders
            .get(&folder.tier)
            .is_some_and(|names| names.contains(&folder.name))
    }

    pub fn insert(&mut self, folder: &FolderRef) {
        self.folders
            .entry(folder.tier)
            .or_default()
            .insert(folder.name.clone());
    }

    pub fn remove(&mut self, folder: &FolderRef) -> bool {
        self.folders
            .get_mut(&folder.tier)
            .is_some_and(|names| names.remove(&folder.name))
    }

    /// Every generation folder outside `today`, oldest name first.
    pub fn generation_folders(&self) -> Vec<FolderRef> {
        let mut folders: Vec<FolderRef> = Tier::ARCHIVE
            .iter()
            .flat_map(|&tier| self.names(tier).map(move |name| FolderRef::new(tier, name)))
            .filter(|folder| !is_tier_container(&folder.name))
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name).then(a.tier.cmp(&b.tier)));
        folders
    }
}

/// Create the backup root and its five tier directories.
pub fn ensure_layout(root: &Path) -> io::Result<()> {
    for tier in Tier::ALL {
        std::fs::create_dir_all(tier.path(root))?;
    }
    Ok(())
}
