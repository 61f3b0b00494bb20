//! Configuration type definitions
//!
//! [`Config`] is the resolved configuration. Each file is read as a
//! [`ConfigLayer`] whose unset keys leave the layer below untouched.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{refinery::EngineSettings, Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RESOLVED CONFIGURATION
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub town_root: Option<PathBuf>,
    pub refinery: RefineryConfig,
    pub rigs: BTreeMap<String, RigConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefineryConfig {
    pub main_branch: String,
    pub remote: String,
    pub merge_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub stale_claim_secs: u64,
    pub issue_prefix: String,
}

impl Default for RefineryConfig {
    fn default() -> Self {
        Self {
            main_branch: "main".to_string(),
            remote: "origin".to_string(),
            merge_timeout_secs: 300,
            poll_interval_secs: 30,
            stale_claim_secs: 1800,
            issue_prefix: "gt".to_string(),
        }
    }
}

impl RefineryConfig {
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            merge_timeout: Duration::from_secs(self.merge_timeout_secs),
            stale_claim: Duration::from_secs(self.stale_claim_secs),
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Where a rig's repository and tracker live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RigConfig {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

impl RigConfig {
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            database: None,
        }
    }

    /// Tracker database file, defaulting to `<path>/.beads/refinery.db`.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.path.join(".beads").join("refinery.db"))
    }
}

impl Config {
    /// Look a rig up by name.
    ///
    /// A rig missing from `[rigs]` falls back to `<town_root>/<name>`.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the rig is unknown and no town root is set.
    pub fn rig(&self, name: &str) -> Result<RigConfig> {
        if name.trim().is_empty() {
            return Err(Error::Validation("rig name cannot be empty".to_string()));
        }
        if let Some(rig) = self.rigs.get(name) {
            return Ok(rig.clone());
        }
        self.town_root
            .as_ref()
            .map(|root| RigConfig::at(root.join(name)))
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown rig '{name}': add [rigs.{name}] to the config or set town_root"
                ))
            })
    }

    /// Infer the rig from a working directory.
    ///
    /// A configured rig whose path contains `cwd` wins; otherwise the first
    /// path component below `town_root`.
    #[must_use]
    pub fn infer_rig(&self, cwd: &Path) -> Option<String> {
        let configured = self
            .rigs
            .iter()
            .filter(|(_, rig)| cwd.starts_with(&rig.path))
            .max_by_key(|(_, rig)| rig.path.components().count())
            .map(|(name, _)| name.clone());
        configured.or_else(|| {
            let root = self.town_root.as_ref()?;
            let rest = cwd.strip_prefix(root).ok()?;
            rest.components()
                .next()
                .and_then(|c| c.as_os_str().to_str())
                .map(String::from)
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FILE LAYERS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configuration file; every key optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub town_root: Option<PathBuf>,
    pub refinery: RefineryLayer,
    pub rigs: BTreeMap<String, RigLayer>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RefineryLayer {
    pub main_branch: Option<String>,
    pub remote: Option<String>,
    pub merge_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub stale_claim_secs: Option<u64>,
    pub issue_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RigLayer {
    pub path: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl Config {
    /// Apply a layer on top of this config (layer takes precedence).
    ///
    /// Rig entries merge key by key; a new rig without a `path` is ignored.
    #[must_use]
    pub fn merge(self, layer: ConfigLayer) -> Self {
        let mut rigs = self.rigs;
        for (name, rig) in layer.rigs {
            match rigs.remove(&name) {
                Some(existing) => {
                    rigs.insert(
                        name,
                        RigConfig {
                            path: rig.path.unwrap_or(existing.path),
                            database: rig.database.or(existing.database),
                        },
                    );
                }
                None => {
                    if let Some(path) = rig.path {
                        rigs.insert(
                            name,
                            RigConfig {
                                path,
                                database: rig.database,
                            },
                        );
                    }
                }
            }
        }

        Self {
            town_root: layer.town_root.or(self.town_root),
            refinery: self.refinery.merge(layer.refinery),
            rigs,
        }
    }
}

impl RefineryConfig {
    fn merge(self, layer: RefineryLayer) -> Self {
        Self {
            main_branch: layer.main_branch.unwrap_or(self.main_branch),
            remote: layer.remote.unwrap_or(self.remote),
            merge_timeout_secs: layer.merge_timeout_secs.unwrap_or(self.merge_timeout_secs),
            poll_interval_secs: layer.poll_interval_secs.unwrap_or(self.poll_interval_secs),
            stale_claim_secs: layer.stale_claim_secs.unwrap_or(self.stale_claim_secs),
            issue_prefix: layer.issue_prefix.unwrap_or(self.issue_prefix),
        }
    }
}
