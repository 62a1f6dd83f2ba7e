//! Pure data types for jobrunner: job records, I/O specs, outcomes.
//!
//! A leaf crate without process control, so consumers can inspect a run's
//! job table and outcomes without pulling in jobrunner-kernel's nix/tokio
//! stack.

pub mod job;
pub mod outcome;

// Flat re-exports for convenience
pub use job::*;
pub use outcome::*;
