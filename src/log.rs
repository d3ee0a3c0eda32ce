//! Structured logging for the hive manager.
//!
//! Events are emitted through `tracing` everywhere in the crate. This module
//! installs the subscriber:
//! - ERROR: failures that prevent a tick unit from completing
//! - WARN: collaborator failures that were downgraded (capture, send, classifier)
//! - INFO: escalations, recoveries, assignments, tick summaries
//! - DEBUG: per-session classification traces
//! - TRACE: raw capture sizes and cache hits
//!
//! Debug mode can be enabled with `--debug` or `HIVE_DEBUG=1`. `RUST_LOG`
//! overrides both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Default filter when neither `RUST_LOG` nor debug mode is set.
pub const DEFAULT_FILTER: &str = "hive=info";

/// Filter used in debug mode.
pub const DEBUG_FILTER: &str = "hive=debug";

/// Initialize logging to ~/.hive/hive.log.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug || env_debug())));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match open_log_file() {
        Some(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .try_init(),
        None => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    // A subscriber installed by a test harness or an earlier call wins.
    let _ = result;
}

/// Path of the log file, if a home directory is available.
pub fn log_path() -> Option<PathBuf> {
    Config::hive_dir().ok().map(|dir| dir.join("hive.log"))
}

fn env_debug() -> bool {
    std::env::var("HIVE_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn default_filter(debug: bool) -> &'static str {
    if debug {
        DEBUG_FILTER
    } else {
        DEFAULT_FILTER
    }
}

fn open_log_file() -> Option<File> {
    let path = log_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    // Truncate on startup
    File::create(path).ok()
}
