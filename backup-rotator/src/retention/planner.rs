//! Pure rotation planning.
//!
//! Given today's date and a snapshot of the tier tree, decide which entries
//! are promoted, which folders fan out into the weekly/monthly/yearly tiers,
//! which expire, and which fall over the generation cap. Each step sees the
//! tree as the previous steps left it.

use chrono::{Datelike, NaiveDate, Weekday};

use super::{
    Action, DeleteReason, FolderRef, MonthlyExpiry, RetentionPolicy, RotationMode, RotationPlan,
    Tier, TierTree,
};

/// Last day of the backup week (ISO weekday 6).
pub const WEEK_END: Weekday = Weekday::Sat;

const DAILY_FORMAT: &str = "%Y%m%d";

/// `YYYYMMDD`
pub fn daily_name(date: NaiveDate) -> String {
    date.format(DAILY_FORMAT).to_string()
}

/// `YYYYMMDD-WW`, with the zero-padded ISO week number.
pub fn weekly_name(date: NaiveDate) -> String {
    format!("{}-{}", daily_name(date), week_suffix(date))
}

/// `YYYYMM`
pub fn monthly_name(date: NaiveDate) -> String {
    date.format("%Y%m").to_string()
}

/// `YYYY`
pub fn yearly_name(date: NaiveDate) -> String {
    date.format("%Y").to_string()
}

fn week_suffix(date: NaiveDate) -> String {
    format!("{:02}", date.iso_week().week())
}

/// Parse a daily folder name; anything but exactly `YYYYMMDD` is rejected.
pub fn parse_daily_name(name: &str) -> Option<NaiveDate> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(name, DAILY_FORMAT).ok()
}

fn is_month_end(date: NaiveDate) -> bool {
    date.succ_opt().map_or(true, |next| next.month() != date.month())
}

/// Plan one rotation for `today` against `tree`.
pub fn plan_rotation(today: NaiveDate, tree: &TierTree, policy: &RetentionPolicy) -> RotationPlan {
    let mut planner = Planner {
        model: tree.clone(),
        plan: RotationPlan {
            today,
            actions: Vec::new(),
            ignored: Vec::new(),
        },
    };

    if policy.mode == RotationMode::Full {
        if let Some(yesterday) = today.pred_opt() {
            planner.promote(yesterday);
            planner.fan_out(today, yesterday);
        }
        planner.expire_daily(today);
        planner.expire_weekly(today);
        planner.expire_monthly(today, policy.monthly_expiry);
    }
    planner.enforce_cap(policy.max_generations);

    planner.plan
}

struct Planner {
    model: TierTree,
    plan: RotationPlan,
}

impl Planner {
    /// Everything under `today` moves into `daily/<yesterday>`.
    fn promote(&mut self, yesterday: NaiveDate) {
        if self.model.today.is_empty() {
            return;
        }

        let target = FolderRef::new(Tier::Daily, daily_name(yesterday));
        for entry in std::mem::take(&mut self.model.today) {
            self.plan.actions.push(Action::Promote {
                entry,
                to: target.clone(),
            });
        }
        self.model.insert(&target);
    }

    /// Copies of yesterday's daily folder on week, month and year boundaries.
    fn fan_out(&mut self, today: NaiveDate, yesterday: NaiveDate) {
        let source = FolderRef::new(Tier::Daily, daily_name(yesterday));

        if yesterday.weekday() == WEEK_END {
            self.copy(&source, FolderRef::new(Tier::Weekly, weekly_name(yesterday)));
        }
        if yesterday.month() != today.month() {
            self.copy(&source, FolderRef::new(Tier::Monthly, monthly_name(yesterday)));
        }
        if yesterday.month() == 12 && yesterday.day() == 31 {
            self.copy(&source, FolderRef::new(Tier::Yearly, yearly_name(yesterday)));
        }
    }

    fn copy(&mut self, from: &FolderRef, to: FolderRef) {
        // A missing source is left for the executor to report.
        if self.model.contains(from) && !self.model.contains(&to) {
            self.model.insert(&to);
        }
        self.plan.actions.push(Action::Copy {
            from: from.clone(),
            to,
        });
    }

    /// Daily folders sharing today's weekday are a week (or more) old.
    fn expire_daily(&mut self, today: NaiveDate) {
        let names: Vec<String> = self.model.names(Tier::Daily).map(str::to_string).collect();

        for name in names {
            let folder = FolderRef::new(Tier::Daily, name);
            match parse_daily_name(&folder.name) {
                Some(date) if date.weekday() == today.weekday() => {
                    self.delete(folder, DeleteReason::DailyExpired);
                }
                Some(_) => {}
                None => self.plan.ignored.push(folder),
            }
        }
    }

    /// On the week-end day, the weekly slot for this week number is reused.
    fn expire_weekly(&mut self, today: NaiveDate) {
        if today.weekday() != WEEK_END {
            return;
        }

        let week = week_suffix(today);
        let expired: Vec<FolderRef> = self
            .model
            .names(Tier::Weekly)
            .filter(|name| name.rsplit_once('-').is_some_and(|(_, suffix)| suffix == week))
            .map(|name| FolderRef::new(Tier::Weekly, name))
            .collect();

        for folder in expired {
            self.delete(folder, DeleteReason::WeeklyExpired);
        }
    }

    /// On the last day of a month, drop the monthly folder this month replaces.
    fn expire_monthly(&mut self, today: NaiveDate, policy: MonthlyExpiry) {
        if !is_month_end(today) {
            return;
        }

        let name = match policy {
            MonthlyExpiry::YearAgo => format!("{}{:02}", today.year() - 1, today.month()),
            MonthlyExpiry::MonthSlot => format!("{:02}", today.month()),
        };
        let folder = FolderRef::new(Tier::Monthly, name);
        if self.model.contains(&folder) {
            self.delete(folder, DeleteReason::MonthlyExpired);
        }
    }

    /// Oldest-named generation folders beyond `max_generations` go, whatever
    /// their tier.
    fn enforce_cap(&mut self, max_generations: usize) {
        let folders = self.model.generation_folders();
        if folders.len() <= max_generations {
            return;
        }

        let excess = folders.len() - max_generations;
        for folder in folders.into_iter().take(excess) {
            self.delete(folder, DeleteReason::OverCap);
        }
    }

    fn delete(&mut self, folder: FolderRef, reason: DeleteReason) {
        self.model.remove(&folder);
        self.plan.actions.push(Action::Delete { folder, reason });
    }
}
