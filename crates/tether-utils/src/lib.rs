//! # Tether Utilities
//!
//! Shared logging and diagnostics helpers for the tether workspace.
//!
//! This crate provides common functionality used across the tether workspace,
//! including production-ready logging infrastructure built on `tracing`.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_file_logging, init_logging, init_logging_with_level, LogFormat, LogLevel};
pub use tracing::{debug, error, info, trace, warn};
