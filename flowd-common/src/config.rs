//! Configuration loading and root folder resolution
//!
//! The root folder holds the workflow definition sources and the flowd
//! database. Resolution follows a fixed priority order so deployments can
//! override the compiled default without code changes.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding workflow definitions and the database
    pub root_folder: Option<String>,
    /// Database file name override (default: flowd.db inside the root folder)
    pub database_file: Option<String>,
}

/// Resolve the root folder using the priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: TOML config file
    if let Ok(config) = load_config_file() {
        if let Some(root_folder) = config.root_folder {
            return Ok(PathBuf::from(root_folder));
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

/// Load the TOML configuration file for the platform
pub fn load_config_file() -> Result<TomlConfig> {
    let path = config_file_path()?;
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read config failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse config failed ({}): {}", path.display(), e)))
}

/// Locate the configuration file for the platform
fn config_file_path() -> Result<PathBuf> {
    // User config first, then the system-wide path on Linux
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("flowd").join("config.toml")) {
        if user_config.exists() {
            return Ok(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/flowd/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("flowd"))
        .unwrap_or_else(|| PathBuf::from("./flowd_data"))
}

/// Database file path within the root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join("flowd.db")
}

/// Create the root folder directory if it does not exist
pub fn ensure_root_folder(root_folder: &Path) -> Result<()> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        tracing::info!("Created root folder: {}", root_folder.display());
    }
    Ok(())
}
