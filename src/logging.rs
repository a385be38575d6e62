//! Logging and tracing configuration for CORE-EXTRACT
//!
//! This module provides structured logging using the `tracing` crate.
//!
//! # Usage
//!
//! Initialize logging at startup:
//! ```rust,ignore
//! logging::init();
//! ```
//!
//! Extractors never log to a UI directly; they report through
//! `ExtractorCallbacks`, and `TracingCallbacks` forwards those reports here.
//!
//! # Log Levels
//!
//! - `error` - Errors that prevent a phase from completing
//! - `warn`  - Per-file failures, limits hit, cancellations
//! - `info`  - Phase progress (default in release)
//! - `debug` - Discovery queries, partition handles (default in debug builds)
//! - `trace` - Per-file hashing detail
//!
//! # Environment Variable Control
//!
//! Set `RUST_LOG` to control log levels at runtime:
//! ```bash
//! RUST_LOG=debug ./core-extract list
//! RUST_LOG=extract_core_lib::extractors::discovery=trace ./core-extract discover ...
//! RUST_LOG=forensic_audit=info,warn ./core-extract extract ...   # audit trail only
//! ```

use tracing_subscriber::{fmt, EnvFilter, prelude::*};

/// Initialize the logging/tracing system
///
/// Call this once at startup (in main.rs)
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            // Default: info in release, debug in debug builds
            if cfg!(debug_assertions) || cfg!(feature = "debug-logging") {
                EnvFilter::new("core_extract=debug,extract_core_lib=debug,forensic_audit=info")
            } else {
                EnvFilter::new("core_extract=info,extract_core_lib=info,forensic_audit=info")
            }
        });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)      // Show module path
                .with_thread_ids(false) // Hide thread IDs (cleaner)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr) // stdout carries JSON results
                .compact()
        );

    // Set as global default (ignore error if already set)
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize logging with verbose output (file:line, thread IDs)
///
/// Worker threads are easier to tell apart with thread IDs on.
pub fn init_verbose() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trace"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr)
                .pretty()
        );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info};

    #[test]
    fn test_init_twice() {
        init();
        init();
        info!("Test log message");
        debug!(key = "value", "Structured log");
    }
}
