//! Path utilities for keeper.
//!
//! # Base Directories
//! - [`get_keeper_dir`] - `~/.keeper/` (base directory for all keeper data)
//! - [`get_logs_dir`] - `~/.keeper/logs/` (default log location)
//!
//! # Per-directive Files
//! - [`default_out_file`] - `~/.keeper/logs/<name>-out.log`
//! - [`default_error_file`] - `~/.keeper/logs/<name>-error.log`
//! - [`instance_log_path`] - per-instance fan-out of a log path

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

use crate::constants::HOME_ENV_VAR;

/// Get the keeper base directory.
///
/// Resolution order:
/// 1. `KEEPER_HOME` environment variable (if set)
/// 2. `~/.keeper/` (default)
pub fn get_keeper_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV_VAR)
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }

    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".keeper"))
}

/// Get the default log directory: `~/.keeper/logs/`
pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(get_keeper_dir()?.join("logs"))
}

/// Default stdout log for a directive: `<logs>/<name>-out.log`
pub fn default_out_file(logs_dir: &Path, name: &str) -> PathBuf {
    logs_dir.join(format!("{name}-out.log"))
}

/// Default stderr log for a directive: `<logs>/<name>-error.log`
pub fn default_error_file(logs_dir: &Path, name: &str) -> PathBuf {
    logs_dir.join(format!("{name}-error.log"))
}

/// Per-instance log path: `output.log` becomes `output-<instance>.log`.
pub fn instance_log_path(path: &Path, instance: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file_name = match path.extension() {
        Some(ext) => format!("{stem}-{instance}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{instance}"),
    };

    path.with_file_name(file_name)
}

/// Resolve `path` against `base` unless it is already absolute.
///
/// `.` components are dropped so `./run.sh` becomes `<base>/run.sh`.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let mut resolved = base.to_path_buf();
    for component in path.components() {
        if component != Component::CurDir {
            resolved.push(component);
        }
    }
    resolved
}
