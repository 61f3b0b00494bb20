//! Rig context: configuration plus the collaborators a command needs.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use refinery_core::{
    config::{load_config, Config, RigConfig},
    git::GitCliMerger,
    mail::TrackerMailer,
    queue::MrRepository,
    refinery::Refinery,
    tracker::{IssueTracker, SqliteTracker},
    Error,
};

/// Resolved configuration for one rig.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub rig_name: String,
    pub rig: RigConfig,
}

impl Context {
    /// Load configuration and resolve `rig`, inferring it from the working
    /// directory when not given.
    pub fn load(rig: Option<&str>) -> Result<Self> {
        let config = load_config()?;
        let rig_name = match rig {
            Some(name) => name.to_string(),
            None => {
                let cwd = std::env::current_dir().map_err(Error::from)?;
                config.infer_rig(&cwd).ok_or_else(|| {
                    Error::Validation(
                        "not inside a rig directory; use --rig to specify".to_string(),
                    )
                })?
            }
        };
        let rig = config.rig(&rig_name)?;
        Ok(Self {
            config,
            rig_name,
            rig,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.rig.database_path()
    }

    pub async fn tracker(&self) -> Result<Arc<dyn IssueTracker>> {
        let path = self.database_path();
        let tracker = SqliteTracker::open(&path, &self.config.refinery.issue_prefix)
            .await
            .with_context(|| format!("opening tracker at {}", path.display()))?;
        Ok(Arc::new(tracker))
    }

    pub async fn repository(&self) -> Result<MrRepository> {
        Ok(MrRepository::new(self.tracker().await?))
    }

    /// Engine wired to the rig's tracker, git checkout and mail.
    pub async fn refinery(&self) -> Result<Refinery> {
        let tracker = self.tracker().await?;
        let merger = GitCliMerger::new(self.rig.path.clone(), self.config.refinery.remote.clone());
        let mailer = TrackerMailer::new(Arc::clone(&tracker));
        Ok(Refinery::new(
            tracker,
            Arc::new(merger),
            Arc::new(mailer),
            self.config.refinery.engine_settings(),
        ))
    }
}
