//! Centralized path configuration.
//!
//! All on-disk locations go through this module so the CLI and tests agree on
//! where configuration lives.

use std::path::PathBuf;

/// Get the configuration directory.
///
/// Resolution order:
/// 1. `BPI_CONFIG_DIR` environment variable
/// 2. `~/.bpi`
/// 3. `./.bpi` when no home directory can be determined
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BPI_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir().map(|h| h.join(".bpi")).unwrap_or_else(|| PathBuf::from(".bpi"))
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}
