//! Structured logging for taskgraph, built on `tracing`.
//!
//! Log levels:
//! - ERROR: Critical failures that prevent operations from completing
//! - WARN: Unexpected conditions that are recoverable (retries, dropped dependencies)
//! - INFO: High-level notifications (startup, shutdown, admissions, completions)
//! - DEBUG: Detailed operation traces (status changes, phase progress)
//! - TRACE: Very detailed traces
//!
//! Priority for determining the level:
//! 1. `TASKGRAPH_LOG` environment variable (e.g. "warn", "trace")
//! 2. `--debug` flag or `TASKGRAPH_DEBUG=1` selects DEBUG
//! 3. default to INFO
//!
//! Output goes to `~/.taskgraph/taskgraph.log` (truncated on startup);
//! stderr is used when no home directory is available.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_subscriber::fmt;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging with explicit debug mode setting.
///
/// Installing the global subscriber only succeeds once; later calls keep
/// the first subscriber.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("TASKGRAPH_DEBUG")
        .map(|v| parse_flag(&v))
        .unwrap_or(false);

    let debug_enabled = debug || env_debug;
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let level = std::env::var("TASKGRAPH_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .unwrap_or(if debug_enabled { Level::DEBUG } else { Level::INFO });

    let builder = fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    match open_log_file() {
        Some(file) => {
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}

fn open_log_file() -> Option<File> {
    let dir = dirs::home_dir()?.join(".taskgraph");
    std::fs::create_dir_all(&dir).ok()?;
    let path = dir.join("taskgraph.log");
    // File::create truncates on startup
    let file = File::create(&path).ok()?;
    LOG_PATH.set(path).ok();
    Some(file)
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Path of the log file, once logging has been initialized with one.
pub fn log_path() -> Option<&'static Path> {
    LOG_PATH.get().map(PathBuf::as_path)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
