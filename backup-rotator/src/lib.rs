//! Backup Rotator Library
//!
//! Tiered retention for directory-server backups: a daily cycle checks free
//! space, rotates `today` into daily/weekly/monthly/yearly generations, caps
//! the generation count and then runs the external backup tool.

pub mod config;
pub mod cycle;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod notify;
pub mod retention;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, RetentionConfig};
pub use utils::errors::RotatorError;
pub type Result<T> = std::result::Result<T, RotatorError>;
