//! Fleetmon Core
//!
//! Core domain types, traits, and error handling for Fleetmon.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod agent;
pub mod config;
pub mod error;
pub mod logs;
pub mod ports;
pub mod snapshot;

pub use error::{Error, Result};

/// Maximum number of metric points retained per agent, in memory and on disk.
///
/// A 3-hour window at the default 15-second poll cadence. The window is a
/// point count, not a duration: a different poll interval changes the
/// physical time span retained.
pub const MAX_HISTORY_POINTS: usize = 720;
