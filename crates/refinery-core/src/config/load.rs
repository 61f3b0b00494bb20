//! Configuration loading from files and environment
//!
//! Every step returns a new [`Config`]; nothing is mutated in place.

use std::path::{Path, PathBuf};

use super::types::{Config, ConfigLayer};
use crate::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUBLIC API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Load configuration from all sources with hierarchy.
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or has unknown keys
/// - An environment override does not parse
/// - The merged values fail validation
pub fn load_config() -> Result<Config> {
    let project = project_config_path()?;
    load_from(global_config_path().as_deref(), Some(&project))
}

/// Load with explicit file locations; missing files are skipped.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Config> {
    let config = [global, project]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .try_fold(Config::default(), |config, path| {
            load_toml_file(path).map(|layer| config.merge(layer))
        })?;

    let config = config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATH HELPERS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Get path to global config file
#[must_use]
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "refinery")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Get path to project config file
///
/// # Errors
///
/// Returns error if current directory cannot be determined
pub fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".refinery").join("config.toml"))
        .map_err(|e| Error::Io(format!("failed to get current directory: {e}")))
}

/// Read one TOML file as a layer.
///
/// # Errors
///
/// Returns error if the path is a directory, cannot be read, or is not
/// valid configuration TOML.
pub fn load_toml_file(path: &Path) -> Result<ConfigLayer> {
    if path.is_dir() {
        return Err(Error::Config(format!(
            "config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("failed to read config file {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse config file {}: {e}", path.display())))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ENVIRONMENT VARIABLE OVERRIDES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Apply `REFINERY_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if an override value is empty or does not parse.
    pub fn apply_env_vars(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("REFINERY_MAIN_BRANCH") {
            if value.trim().is_empty() {
                return Err(Error::Config(
                    "REFINERY_MAIN_BRANCH cannot be empty - unset the variable or provide a branch name"
                        .to_string(),
                ));
            }
            self.refinery.main_branch = value;
        }

        if let Ok(value) = std::env::var("REFINERY_REMOTE") {
            if value.trim().is_empty() {
                return Err(Error::Config(
                    "REFINERY_REMOTE cannot be empty - unset the variable or provide a remote name"
                        .to_string(),
                ));
            }
            self.refinery.remote = value;
        }

        if let Ok(value) = std::env::var("REFINERY_MERGE_TIMEOUT_SECS") {
            self.refinery.merge_timeout_secs = value.trim().parse().map_err(|e| {
                Error::Config(format!("invalid REFINERY_MERGE_TIMEOUT_SECS value '{value}': {e}"))
            })?;
        }

        if let Ok(value) = std::env::var("REFINERY_TOWN_ROOT") {
            if !value.trim().is_empty() {
                self.town_root = Some(PathBuf::from(value));
            }
        }

        Ok(self)
    }
}
