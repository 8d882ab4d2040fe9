use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::types::SandpitConfig;
use crate::error::{Result, SandpitError};

/// Environment variable holding extra package-manager flags.
pub const NPM_FLAGS_ENV: &str = "NPM_FLAGS";

/// Environment variable toggling the dev server restart after installs.
pub const AUTO_RESTART_ENV: &str = "AUTO_RESTART_VITE";

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sandpit", "sandpit") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".sandpit").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values,
/// then apply overrides from the process environment.
pub fn load_config(config_path: Option<&Path>) -> Result<SandpitConfig> {
    let mut config = read_config_file(config_path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn read_config_file(config_path: Option<&Path>) -> Result<SandpitConfig> {
    let explicit = config_path.is_some();
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        if explicit {
            return Err(SandpitError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        // Return defaults if no config file exists
        return Ok(SandpitConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: SandpitConfig =
        toml::from_str(&content).map_err(|e| SandpitError::TomlParse(e.to_string()))?;

    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Apply operator overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut SandpitConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(flags) = lookup(NPM_FLAGS_ENV) {
        config.packages.extra_flags = flags;
    }
    if let Some(toggle) = lookup(AUTO_RESTART_ENV) {
        config.packages.auto_restart_dev_server = toggle.trim() == "true";
    }
}

/// Get the data directory (local sandboxes live under it)
pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "sandpit", "sandpit") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs_fallback().join(".local").join("share").join("sandpit")
    }
}
