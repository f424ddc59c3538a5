//! Utility modules for the rotator.

pub mod errors;
pub mod logger;

pub use errors::{Result, RotatorError};
