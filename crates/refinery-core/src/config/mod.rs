//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/refinery/config.toml`
//! 3. Project config: `.refinery/config.toml`
//! 4. Environment variables: `REFINERY_*`
//! 5. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! town_root = "/home/me/gt"
//!
//! [refinery]
//! main_branch = "main"
//! merge_timeout_secs = 600
//!
//! [rigs.gastown]
//! path = "/home/me/gt/gastown"
//! ```

mod load;
mod types;
mod validate;

pub use load::{global_config_path, load_config, load_from, load_toml_file, project_config_path};
pub use types::{Config, ConfigLayer, RefineryConfig, RefineryLayer, RigConfig, RigLayer};
