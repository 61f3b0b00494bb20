//! MR Repository - merge requests persisted as tracker issues.
//!
//! Every status change goes through [`MrStatus::validate_transition`] and
//! then a compare-and-set on the tracker, so a write either lands on the
//! state it was planned against or is refused as a whole.

use std::sync::Arc;

use tracing::{debug, info};

use super::view;
use crate::{
    mr::{
        fields::{self, MrFields},
        types::{MergeRequest, MrStatus, TransitionError},
    },
    tracker::{
        IssueFilter, IssueTracker, IssueType, IssueUpdate, NewIssue, Priority, Transition,
        TransitionOutcome,
    },
    Error, Result,
};

/// Label prefix tying an MR issue to its target branch.
pub const TARGET_LABEL_PREFIX: &str = "refinery-target:";

/// Exclusive label carried by every MR aimed at `target`.
#[must_use]
pub fn target_label(target: &str) -> String {
    format!("{TARGET_LABEL_PREFIX}{target}")
}

/// Result of trying to move an MR into `in_progress`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The MR is now `in_progress` and owned by the caller.
    Claimed(MergeRequest),
    /// Another MR of the same target is already `in_progress`.
    TargetBusy { holder: String },
    /// The MR left `open` before the claim landed.
    Lost(MrStatus),
}

/// Persistence for merge requests.
#[derive(Clone)]
pub struct MrRepository {
    tracker: Arc<dyn IssueTracker>,
}

impl std::fmt::Debug for MrRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MrRepository").finish_non_exhaustive()
    }
}

impl MrRepository {
    #[must_use]
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }

    /// The backing tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<dyn IssueTracker> {
        &self.tracker
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // CREATE & READ
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Store a new MR in `open` status, waiting on `blocked_by`.
    ///
    /// The record and its dependencies are written together; if any blocker
    /// is unknown nothing is stored.
    pub async fn create(
        &self,
        fields: &MrFields,
        priority: Priority,
        blocked_by: &[String],
    ) -> Result<MergeRequest> {
        let issue = NewIssue::new(
            format!("Merge: {}", fields.source_issue),
            IssueType::Task,
            priority,
        )
        .with_description(fields::encode(fields))
        .with_label(target_label(&fields.target));
        let issue = blocked_by
            .iter()
            .fold(issue, |issue, blocker| issue.with_dependency(blocker.as_str()));

        let issue = self.tracker.create(issue).await?;
        let mr = decode(&issue.id, &issue)?;
        info!(
            mr_id = %mr.id,
            branch = %mr.branch,
            target_branch = %mr.target,
            priority = %mr.priority,
            blocked_by = ?blocked_by,
            "Merge request created"
        );
        Ok(mr)
    }

    /// Look an MR up by identifier; `None` if absent or not an MR.
    pub async fn find(&self, id: &str) -> Result<Option<MergeRequest>> {
        Ok(self
            .tracker
            .show(id)
            .await?
            .and_then(|issue| MergeRequest::from_issue(&issue)))
    }

    /// Look an MR up by identifier.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if no MR has this identifier.
    pub async fn get(&self, id: &str) -> Result<MergeRequest> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Resolve by identifier, then by exact branch name.
    ///
    /// Among several MRs for one branch the newest open one wins, then the
    /// newest of any status.
    pub async fn resolve(&self, id_or_branch: &str) -> Result<MergeRequest> {
        if let Some(mr) = self.find(id_or_branch).await? {
            return Ok(mr);
        }

        let mut matches: Vec<MergeRequest> = self
            .list(None)
            .await?
            .into_iter()
            .filter(|mr| mr.branch == id_or_branch)
            .collect();
        matches.sort_by_key(|mr| (mr.status == MrStatus::Open, mr.created_at));
        matches
            .pop()
            .ok_or_else(|| Error::NotFound(id_or_branch.to_string()))
    }

    /// All MRs, optionally restricted to one stored status, oldest first.
    pub async fn list(&self, status: Option<MrStatus>) -> Result<Vec<MergeRequest>> {
        let issues = self
            .tracker
            .list(&IssueFilter {
                issue_type: Some(IssueType::Task),
                status: status.map(Into::into),
                label: None,
            })
            .await?;
        Ok(view::merge_requests(&issues))
    }

    /// MRs the tracker reports ready, narrowed to MR records.
    pub async fn ready(&self) -> Result<Vec<MergeRequest>> {
        let issues = self.tracker.ready().await?;
        Ok(view::ready(&issues))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // TRANSITIONS
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `open` -> `in_progress`, refused while the target has another
    /// `in_progress` MR.
    pub async fn claim(&self, mr: &MergeRequest) -> Result<Claim> {
        let outcome = self
            .apply(
                &mr.id,
                MrStatus::Open,
                MrStatus::InProgress,
                IssueUpdate::status(MrStatus::InProgress.into()),
                Some(target_label(&mr.target)),
            )
            .await?;
        match outcome {
            TransitionOutcome::Applied(issue) => decode(&mr.id, &issue).map(Claim::Claimed),
            TransitionOutcome::Contended { holder } => Ok(Claim::TargetBusy { holder }),
            TransitionOutcome::StatusMismatch(status) => Ok(Claim::Lost(status.into())),
        }
    }

    /// `in_progress` -> `closed`.
    pub async fn mark_merged(&self, id: &str) -> Result<MergeRequest> {
        self.expect_applied(
            id,
            MrStatus::InProgress,
            MrStatus::Closed,
            IssueUpdate::status(MrStatus::Closed.into())
                .clear_notes()
                .with_close_reason("merged"),
        )
        .await
    }

    /// `in_progress` -> `open`, recording the failure.
    pub async fn record_failure(&self, id: &str, error: &str) -> Result<MergeRequest> {
        self.expect_applied(
            id,
            MrStatus::InProgress,
            MrStatus::Open,
            IssueUpdate::status(MrStatus::Open.into()).with_notes(error),
        )
        .await
    }

    /// `open` -> `open` with the recorded failure cleared.
    pub async fn clear_error(&self, id: &str) -> Result<MergeRequest> {
        self.expect_applied(
            id,
            MrStatus::Open,
            MrStatus::Open,
            IssueUpdate::default().clear_notes(),
        )
        .await
    }

    /// `open` -> `rejected` with the reason kept as the close reason.
    pub async fn reject(&self, id: &str, reason: &str) -> Result<MergeRequest> {
        self.expect_applied(
            id,
            MrStatus::Open,
            MrStatus::Rejected,
            IssueUpdate::status(MrStatus::Rejected.into()).with_close_reason(reason),
        )
        .await
    }

    async fn apply(
        &self,
        id: &str,
        from: MrStatus,
        to: MrStatus,
        update: IssueUpdate,
        exclusive_label: Option<String>,
    ) -> Result<TransitionOutcome> {
        from.validate_transition(to)?;
        let transition = Transition {
            from: from.into(),
            update,
            exclusive_label,
        };
        let outcome = self.tracker.transition(id, transition).await?;
        if matches!(outcome, TransitionOutcome::Applied(_)) {
            debug!(mr_id = %id, from = %from, to = %to, "Merge request transitioned");
        }
        Ok(outcome)
    }

    async fn expect_applied(
        &self,
        id: &str,
        from: MrStatus,
        to: MrStatus,
        update: IssueUpdate,
    ) -> Result<MergeRequest> {
        match self.apply(id, from, to, update, None).await? {
            TransitionOutcome::Applied(issue) => decode(id, &issue),
            TransitionOutcome::StatusMismatch(actual) => Err(TransitionError {
                from: actual.into(),
                to,
            }
            .into()),
            TransitionOutcome::Contended { holder } => Err(Error::TargetBusy {
                target: id.to_string(),
                holder,
            }),
        }
    }
}

fn decode(id: &str, issue: &crate::tracker::Issue) -> Result<MergeRequest> {
    MergeRequest::from_issue(issue).ok_or_else(|| Error::NotFound(id.to_string()))
}
