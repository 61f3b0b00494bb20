//! Mail collaborator.
//!
//! Workers read their mail from the tracker, so the default transport files
//! each message as a `message` issue assigned to the recipient.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    tracker::{IssueTracker, IssueType, NewIssue, Priority},
    Error, Result,
};

/// Sends a notification to an address.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<()>;
}

/// Delivers mail as tracker issues.
#[derive(Clone)]
pub struct TrackerMailer {
    tracker: Arc<dyn IssueTracker>,
}

impl TrackerMailer {
    #[must_use]
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Mailer for TrackerMailer {
    async fn send(&self, address: &str, subject: &str, body: &str) -> Result<()> {
        if address.trim().is_empty() {
            return Err(Error::Mail("empty recipient address".to_string()));
        }
        let message = NewIssue::new(subject, IssueType::Message, Priority::default())
            .with_description(body)
            .with_assignee(address);
        let issue = self
            .tracker
            .create(message)
            .await
            .map_err(|e| Error::Mail(format!("failed to deliver to {address}: {e}")))?;
        debug!(to = %address, message_id = %issue.id, "Mail delivered");
        Ok(())
    }
}

/// Mail address of a worker within a rig.
#[must_use]
pub fn worker_address(rig: &str, worker: &str) -> String {
    format!("{rig}/{worker}")
}
