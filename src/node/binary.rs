//! Node executable resolution and validation.
//!
//! This module resolves the node executable from a bare name (looked up on
//! `PATH`) or an explicit path, and validates that it exists and is
//! executable before anything is launched.

use std::env;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Errors that can occur during executable resolution or validation
#[derive(Debug, thiserror::Error)]
pub enum BinaryError {
    #[error("Executable not found: {path}")]
    NotFound { path: String },

    #[error("Executable is not executable: {path}")]
    NotExecutable { path: String },

    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// Get the user's home directory from the HOME environment variable
fn get_home_dir() -> Result<PathBuf, BinaryError> {
    env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| BinaryError::NoHomeDir)
}

/// Resolve an executable from a shorthand name or explicit path.
///
/// Resolution rules:
/// 1. If the name contains `/` or starts with `~`: treat as explicit path
/// 2. Otherwise: search each directory on `PATH` for an executable file
///
/// # Examples
///
/// ```ignore
/// resolve_executable("bitcoind")            -> /usr/local/bin/bitcoind
/// resolve_executable("~/bch/bin/bitcoind")  -> /home/user/bch/bin/bitcoind
/// resolve_executable("/opt/ltc/litecoind")  -> /opt/ltc/litecoind
/// ```
pub fn resolve_executable(name_or_path: &str) -> Result<PathBuf, BinaryError> {
    if name_or_path.is_empty() {
        return Err(BinaryError::InvalidPath {
            path: name_or_path.to_string(),
        });
    }

    if let Some(rest) = name_or_path.strip_prefix("~/") {
        return Ok(get_home_dir()?.join(rest));
    }
    if name_or_path.contains('/') {
        return Ok(PathBuf::from(name_or_path));
    }

    let search_path = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&search_path)
        .map(|dir| dir.join(name_or_path))
        .find(|candidate| validate_executable(candidate).is_ok())
        .ok_or_else(|| BinaryError::NotFound {
            path: name_or_path.to_string(),
        })
}

/// Validate that an executable exists and has an execute bit set.
pub fn validate_executable(path: &Path) -> Result<(), BinaryError> {
    if !path.is_file() {
        return Err(BinaryError::NotFound {
            path: path.display().to_string(),
        });
    }

    let metadata = path.metadata().map_err(|_| BinaryError::InvalidPath {
        path: path.display().to_string(),
    })?;

    #[cfg(unix)]
    {
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(BinaryError::NotExecutable {
                path: path.display().to_string(),
            });
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}

/// Resolve and validate in one step.
pub fn locate_executable(name_or_path: &str) -> Result<PathBuf, BinaryError> {
    let resolved = resolve_executable(name_or_path)?;
    validate_executable(&resolved)?;
    Ok(resolved)
}
