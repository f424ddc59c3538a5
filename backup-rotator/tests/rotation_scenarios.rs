//! End-to-end rotations against a scratch backup root.

use backup_rotator::fs::walker::used_bytes;
use backup_rotator::retention::{
    apply_plan, ensure_layout, plan_rotation, MonthlyExpiry, RetentionPolicy, RotationMode,
    RotationReport, TierTree,
};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn policy(max_generations: usize) -> RetentionPolicy {
    RetentionPolicy {
        max_generations,
        monthly_expiry: MonthlyExpiry::YearAgo,
        mode: RotationMode::Full,
    }
}

fn generation(root: &Path, tier: &str, name: &str) {
    let dir = root.join(tier).join(name).join("userRoot");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("backup.info"), name).unwrap();
}

fn names(root: &Path, tier: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join(tier))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

fn rotate(root: &Path, today: NaiveDate, policy: &RetentionPolicy) -> RotationReport {
    ensure_layout(root).unwrap();
    let tree = TierTree::read(root).unwrap();
    let plan = plan_rotation(today, &tree, policy);
    apply_plan(root, &plan)
}

#[test]
fn test_wednesday_promotes_today_into_tuesday() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    ensure_layout(root).unwrap();
    fs::create_dir_all(root.join("today/backendA/db")).unwrap();
    fs::write(root.join("today/backendA/db/00000000.jdb"), vec![7u8; 4096]).unwrap();
    fs::write(root.join("today/backendA/backup.info"), "ds-cfg-backend-id=backendA\n").unwrap();
    let before = used_bytes(root);

    let wednesday = date(2024, 3, 13);
    assert_eq!(wednesday.weekday(), Weekday::Wed);
    let report = rotate(root, wednesday, &policy(10));

    assert!(report.is_clean(), "{}", report.failure_summary());
    assert!(names(root, "today").is_empty());
    assert_eq!(names(root, "daily"), vec!["20240312"]);
    assert!(root.join("daily/20240312/backendA/db/00000000.jdb").is_file());
    assert!(root.join("daily/20240312/backendA/backup.info").is_file());
    assert!(names(root, "weekly").is_empty());
    assert!(names(root, "monthly").is_empty());
    assert!(names(root, "yearly").is_empty());

    // moved, not copied
    assert_eq!(used_bytes(root), before);
}

#[test]
fn test_ten_days_of_dailies_lose_the_matching_weekday() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let today = date(2024, 3, 13);
    assert_eq!(today.weekday().number_from_monday(), 3);

    let mut expected = Vec::new();
    for back in 1..=10 {
        let day = today - Duration::days(back);
        let name = day.format("%Y%m%d").to_string();
        generation(root, "daily", &name);
        if day.weekday() != today.weekday() {
            expected.push(name);
        }
    }
    expected.sort();

    let report = rotate(root, today, &policy(20));

    assert!(report.is_clean(), "{}", report.failure_summary());
    assert_eq!(expected.len(), 9);
    assert_eq!(names(root, "daily"), expected);
    assert!(!root.join("daily/20240306").exists());
}

#[test]
fn test_sunday_fans_out_saturday_into_weekly() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    ensure_layout(root).unwrap();
    fs::create_dir_all(root.join("today/userRoot")).unwrap();
    fs::write(root.join("today/userRoot/backup.info"), "saturday").unwrap();

    let report = rotate(root, date(2024, 3, 17), &policy(10));

    assert!(report.is_clean(), "{}", report.failure_summary());
    assert_eq!(names(root, "daily"), vec!["20240316"]);
    assert_eq!(names(root, "weekly"), vec!["20240316-11"]);
    assert_eq!(
        fs::read_to_string(root.join("weekly/20240316-11/userRoot/backup.info")).unwrap(),
        "saturday"
    );
    assert!(names(root, "monthly").is_empty());
}

#[test]
fn test_no_fan_out_on_ordinary_days() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let mut today = date(2024, 3, 11);

    // Monday through Friday, one backup each night
    for _ in 0..5 {
        fs::create_dir_all(root.join("today/userRoot")).unwrap();
        fs::write(root.join("today/userRoot/backup.info"), today.to_string()).unwrap();
        let report = rotate(root, today, &policy(10));
        assert!(report.is_clean(), "{}", report.failure_summary());
        today = today.succ_opt().unwrap();
    }

    assert_eq!(
        names(root, "daily"),
        vec!["20240310", "20240311", "20240312", "20240313", "20240314"]
    );
    assert!(names(root, "weekly").is_empty());
    assert!(names(root, "monthly").is_empty());
    assert!(names(root, "yearly").is_empty());
}

#[test]
fn test_cap_removes_oldest_names_across_tiers() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    for name in ["20240301", "20240302", "20240303", "20240304", "20240305"] {
        generation(root, "daily", name);
    }
    generation(root, "weekly", "20240224-08");

    let today = date(2024, 3, 7);
    let report = rotate(root, today, &policy(3));

    assert!(report.is_clean(), "{}", report.failure_summary());
    assert_eq!(names(root, "daily"), vec!["20240303", "20240304", "20240305"]);
    assert!(names(root, "weekly").is_empty());
    for tier in ["today", "daily", "weekly", "monthly", "yearly"] {
        assert!(root.join(tier).is_dir());
    }
}

#[test]
fn test_cap_only_leaves_today_alone() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("today/userRoot")).unwrap();
    for name in ["20240311", "20240312"] {
        generation(root, "daily", name);
    }

    let report = rotate(
        root,
        date(2024, 3, 13),
        &RetentionPolicy {
            mode: RotationMode::CapOnly,
            ..policy(1)
        },
    );

    assert!(report.is_clean(), "{}", report.failure_summary());
    assert!(root.join("today/userRoot").is_dir());
    assert_eq!(names(root, "daily"), vec!["20240312"]);
}
