//! Configuration validation

use super::types::Config;
use crate::{Error, Result};

impl Config {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a name is blank, a duration is zero, or
    /// the stale-claim threshold is shorter than the merge timeout.
    pub fn validate(&self) -> Result<()> {
        let r = &self.refinery;

        let names = [
            ("main_branch", &r.main_branch),
            ("remote", &r.remote),
            ("issue_prefix", &r.issue_prefix),
        ];
        if let Some((key, _)) = names.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(Error::Config(format!("{key} cannot be empty")));
        }

        let durations = [
            ("merge_timeout_secs", r.merge_timeout_secs),
            ("poll_interval_secs", r.poll_interval_secs),
            ("stale_claim_secs", r.stale_claim_secs),
        ];
        if let Some((key, _)) = durations.iter().find(|(_, secs)| *secs == 0) {
            return Err(Error::Config(format!("{key} must be greater than zero")));
        }

        if r.stale_claim_secs < r.merge_timeout_secs {
            return Err(Error::Config(format!(
                "stale_claim_secs ({}) must not be shorter than merge_timeout_secs ({})",
                r.stale_claim_secs, r.merge_timeout_secs
            )));
        }

        if let Some((name, _)) = self
            .rigs
            .iter()
            .find(|(_, rig)| rig.path.as_os_str().is_empty())
        {
            return Err(Error::Config(format!("rig '{name}' has an empty path")));
        }

        Ok(())
    }
}
