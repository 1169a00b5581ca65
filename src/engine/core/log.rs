use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;

pub const DEBUG_LOG_FILE: &str = "audioshrink.log";

/// Location of the debug log: audioshrink.log in the current directory
pub fn debug_log_path() -> Result<PathBuf> {
    Ok(std::env::current_dir()?.join(DEBUG_LOG_FILE))
}

/// Install the global tracing subscriber
///
/// With `debug_file` set, output is appended to [`DEBUG_LOG_FILE`] instead
/// of going to stderr, so progress rendering stays readable.
pub fn init_logging(level: Level, debug_file: bool) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    let installed = if debug_file {
        let log_path = debug_log_path()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
    } else {
        builder.with_writer(std::io::stderr).try_init()
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

/// Parse a level name from config ("info", "debug", ...)
pub fn parse_level(name: &str) -> Result<Level> {
    name.trim()
        .parse::<Level>()
        .map_err(|_| anyhow::anyhow!("Unknown log level '{}'", name))
}
