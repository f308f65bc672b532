//! Runtime glue shared by every engine: configuration, fatal-error propagation, progress
//! accounting, and telemetry.

pub mod config;
pub mod fatal;
pub mod progress;
pub mod telemetry;
