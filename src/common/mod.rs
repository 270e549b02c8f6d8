//! Common utility modules shared across the codebase.

pub mod fs;
pub mod process;
