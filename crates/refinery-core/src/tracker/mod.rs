//! Issue tracker collaborator.
//!
//! The merge queue persists everything as generic issues. This module defines
//! the store surface it consumes ([`IssueTracker`]) plus two backends:
//!
//! - [`MemoryTracker`]: a single-lock in-process store (tests, embedding)
//! - [`SqliteTracker`]: a `SQLite` file shared by every process of a rig

mod id;
mod memory;
mod sqlite;
mod types;

pub use id::IdGenerator;
pub use memory::MemoryTracker;
pub use sqlite::SqliteTracker;
pub use types::{
    Issue, IssueFilter, IssueStatus, IssueType, IssueUpdate, NewIssue, Priority, Transition,
    TransitionOutcome,
};

use crate::Result;

/// Persistence boundary for issues.
///
/// Every method is atomic with respect to the store: a concurrent reader
/// sees a record either before or after a write, never half of it.
#[async_trait::async_trait]
pub trait IssueTracker: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // READS
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Fetch one issue; `None` if absent.
    async fn show(&self, id: &str) -> Result<Option<Issue>>;

    /// Issues matching the filter, oldest first.
    async fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>>;

    /// Open issues with no unresolved blockers, by priority then age.
    async fn ready(&self) -> Result<Vec<Issue>>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // WRITES
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create an issue in `open` status.
    ///
    /// The issue, its labels and its dependencies land in one write; on
    /// error nothing is stored.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if a dependency does not exist.
    async fn create(&self, issue: NewIssue) -> Result<Issue>;

    /// Unconditional field update.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the issue does not exist.
    async fn update(&self, id: &str, update: IssueUpdate) -> Result<Issue>;

    /// Compare-and-set status change.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the issue does not exist. A status mismatch or
    /// a contended exclusive label is reported in the outcome, not as an error.
    async fn transition(&self, id: &str, transition: Transition) -> Result<TransitionOutcome>;

    /// Close an issue with a reason.
    async fn close(&self, id: &str, reason: &str) -> Result<Issue> {
        self.update(
            id,
            IssueUpdate::status(IssueStatus::Closed).with_close_reason(reason),
        )
        .await
    }
}
