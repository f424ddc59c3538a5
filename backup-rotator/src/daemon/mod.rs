//! Process-level plumbing: signals and scheduler registration.

pub mod crontab;
pub mod shutdown;
