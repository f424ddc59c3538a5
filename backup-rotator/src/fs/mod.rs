//! Filesystem side of the rotator: inventory, usage, free space.

pub mod inventory;
pub mod space;
pub mod walker;
