//! Refinery Engine - processes the queue one merge per target at a time.
//!
//! A cycle reclaims stale claims, plans one candidate per idle target, then
//! runs the candidates concurrently. Each attempt holds the target lock for
//! its whole duration and the tracker claim refuses a second `in_progress`
//! MR on the same target, so attempts never overlap on a target.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{
    locks::TargetLocks,
    selection::{self, busy_targets},
};
use crate::{
    git::Merger,
    mail::{worker_address, Mailer},
    mr::types::{MergeRequest, MrStatus, TransitionError},
    queue::{Claim, MrRepository},
    tracker::IssueTracker,
    Error, Result,
};

/// Timing knobs for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Upper bound on one merge attempt.
    pub merge_timeout: Duration,
    /// Age after which an `in_progress` claim is considered abandoned.
    pub stale_claim: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            merge_timeout: Duration::from_secs(300),
            stale_claim: Duration::from_secs(1800),
        }
    }
}

/// Result of one merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    Merged(MergeRequest),
    Failed { mr: MergeRequest, error: String },
}

impl ProcessResult {
    #[must_use]
    pub const fn mr(&self) -> &MergeRequest {
        match self {
            Self::Merged(mr) | Self::Failed { mr, .. } => mr,
        }
    }

    #[must_use]
    pub const fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }
}

/// What one processing cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// MRs returned to `open` because their claim went stale.
    pub reclaimed: Vec<MergeRequest>,
    /// Attempts made this cycle.
    pub processed: Vec<ProcessResult>,
    /// Targets skipped because an MR was already `in_progress`.
    pub busy_targets: Vec<String>,
    /// Per-target failures that did not stop the rest of the cycle.
    pub errors: Vec<(String, Error)>,
}

impl CycleReport {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.reclaimed.is_empty() && self.processed.is_empty() && self.errors.is_empty()
    }
}

/// What happened to the immediate attempt of a `retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAttempt {
    NotRequested,
    Ran(ProcessResult),
    /// The MR stays queued; the attempt could not start.
    Refused(Error),
}

/// Outcome of `retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    /// The MR after its error was cleared.
    pub mr: MergeRequest,
    pub attempt: RetryAttempt,
}

/// Whether the worker heard about a rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NotRequested,
    Sent { address: String },
    Skipped { reason: String },
    Failed { error: String },
}

/// Outcome of `reject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectOutcome {
    pub mr: MergeRequest,
    pub notification: Notification,
}

/// The merge-queue processing engine for one rig.
#[derive(Clone)]
pub struct Refinery {
    repo: MrRepository,
    merger: Arc<dyn Merger>,
    mailer: Arc<dyn Mailer>,
    locks: TargetLocks,
    settings: EngineSettings,
}

impl std::fmt::Debug for Refinery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refinery")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Refinery {
    #[must_use]
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        merger: Arc<dyn Merger>,
        mailer: Arc<dyn Mailer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repo: MrRepository::new(tracker),
            merger,
            mailer,
            locks: TargetLocks::new(),
            settings,
        }
    }

    #[must_use]
    pub const fn repository(&self) -> &MrRepository {
        &self.repo
    }

    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // QUERIES
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Full record of one MR, including its last error.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if no MR has this identifier.
    pub async fn get_mr(&self, id: &str) -> Result<MergeRequest> {
        self.repo.get(id).await
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // PROCESSING
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run one cycle over every target.
    pub async fn process_cycle(&self) -> Result<CycleReport> {
        let reclaimed = self.reclaim_stale().await?;

        let mut active = self.repo.list(Some(MrStatus::Open)).await?;
        active.extend(self.repo.list(Some(MrStatus::InProgress)).await?);

        let busy: Vec<String> = busy_targets(&active)
            .into_iter()
            .map(ToString::to_string)
            .collect();
        for target in &busy {
            debug!(target_branch = %target, "Target busy, skipping this cycle");
        }

        let candidates: Vec<MergeRequest> = selection::plan(&active)
            .into_values()
            .cloned()
            .collect();
        let attempts = candidates.iter().map(|mr| self.process_candidate(mr));
        let outcomes = join_all(attempts).await;

        let mut report = CycleReport {
            reclaimed,
            busy_targets: busy,
            ..CycleReport::default()
        };
        for (mr, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(Some(result)) => report.processed.push(result),
                Ok(None) => report.busy_targets.push(mr.target.clone()),
                Err(e) => {
                    warn!(mr_id = %mr.id, target_branch = %mr.target, error = %e, "Processing failed");
                    report.errors.push((mr.target.clone(), e));
                }
            }
        }
        Ok(report)
    }

    /// Claim and attempt a planned candidate; `None` if someone beat us to it.
    async fn process_candidate(&self, mr: &MergeRequest) -> Result<Option<ProcessResult>> {
        let Some(_guard) = self.locks.try_acquire(&mr.target).await else {
            debug!(mr_id = %mr.id, target_branch = %mr.target, "Target locked in this process");
            return Ok(None);
        };
        match self.repo.claim(mr).await? {
            Claim::Claimed(claimed) => self.attempt(claimed).await.map(Some),
            Claim::TargetBusy { holder } => {
                debug!(mr_id = %mr.id, holder = %holder, "Target claimed elsewhere");
                Ok(None)
            }
            Claim::Lost(status) => {
                debug!(mr_id = %mr.id, status = %status, "Merge request changed before claim");
                Ok(None)
            }
        }
    }

    /// Attempt one specific MR now, outside the cycle.
    ///
    /// Waits for the target lock, so it never overlaps another attempt on
    /// the same target made by this process.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` if the MR does not exist
    /// - `Error::Validation` if it is still blocked
    /// - `Error::TargetBusy` if another MR of the target is `in_progress`
    /// - `Error::InvalidTransition` if it is not `open`
    pub async fn process_mr(&self, id: &str) -> Result<ProcessResult> {
        let mr = self.repo.get(id).await?;
        if mr.status == MrStatus::Open && !mr.blocked_by.is_empty() {
            return Err(Error::Validation(format!(
                "merge request '{id}' is blocked by {}",
                mr.blocked_by.join(", ")
            )));
        }

        let _guard = self.locks.acquire(&mr.target).await;
        match self.repo.claim(&mr).await? {
            Claim::Claimed(claimed) => self.attempt(claimed).await,
            Claim::TargetBusy { holder } => Err(Error::TargetBusy {
                target: mr.target,
                holder,
            }),
            Claim::Lost(status) => Err(TransitionError {
                from: status,
                to: MrStatus::InProgress,
            }
            .into()),
        }
    }

    /// Run the merge for a claimed MR and record the outcome.
    async fn attempt(&self, mr: MergeRequest) -> Result<ProcessResult> {
        info!(
            mr_id = %mr.id,
            branch = %mr.branch,
            target_branch = %mr.target,
            "Attempting merge"
        );

        let failure = match tokio::time::timeout(self.settings.merge_timeout, self.merger.merge(&mr))
            .await
        {
            Ok(Ok(())) => self.close_source_issue(&mr).await.err(),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "merge attempt timed out after {:?}",
                self.settings.merge_timeout
            )),
        };

        match failure {
            None => {
                let merged = self.repo.mark_merged(&mr.id).await?;
                info!(mr_id = %merged.id, target_branch = %merged.target, "Merged");
                Ok(ProcessResult::Merged(merged))
            }
            Some(error) => {
                warn!(mr_id = %mr.id, target_branch = %mr.target, error = %error, "Merge failed");
                let failed = self.repo.record_failure(&mr.id, &error).await?;
                Ok(ProcessResult::Failed { mr: failed, error })
            }
        }
    }

    /// Close the source issue after a landed merge.
    ///
    /// A source issue unknown to this tracker is left alone.
    async fn close_source_issue(&self, mr: &MergeRequest) -> std::result::Result<(), String> {
        if mr.source_issue.is_empty() {
            return Ok(());
        }
        let reason = format!("Merged in {}", mr.id);
        match self.repo.tracker().close(&mr.source_issue, &reason).await {
            Ok(_) => {
                debug!(mr_id = %mr.id, source_issue = %mr.source_issue, "Source issue closed");
                Ok(())
            }
            Err(Error::NotFound(_)) => {
                warn!(mr_id = %mr.id, source_issue = %mr.source_issue, "Source issue not found, not closed");
                Ok(())
            }
            Err(e) => Err(format!(
                "merged, but closing source issue {} failed: {e}",
                mr.source_issue
            )),
        }
    }

    /// Return abandoned `in_progress` claims to `open` with an error.
    ///
    /// Claims whose target is locked by this process are still running and
    /// are left alone.
    pub async fn reclaim_stale(&self) -> Result<Vec<MergeRequest>> {
        let threshold = chrono::Duration::from_std(self.settings.stale_claim)
            .map_err(|e| Error::Config(format!("stale claim threshold out of range: {e}")))?;
        let now = Utc::now();

        let mut reclaimed = Vec::new();
        for mr in self.repo.list(Some(MrStatus::InProgress)).await? {
            if now - mr.updated_at < threshold {
                continue;
            }
            let Some(_guard) = self.locks.try_acquire(&mr.target).await else {
                continue;
            };
            let error = format!(
                "claim expired after {}s without completing",
                self.settings.stale_claim.as_secs()
            );
            match self.repo.record_failure(&mr.id, &error).await {
                Ok(open) => {
                    warn!(mr_id = %open.id, target_branch = %open.target, "Reclaimed stale claim");
                    reclaimed.push(open);
                }
                Err(Error::InvalidTransition(_)) => {
                    debug!(mr_id = %mr.id, "Claim resolved while reclaiming");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reclaimed)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // OPERATOR ACTIONS
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Clear a failed MR's error so it is eligible again.
    ///
    /// With `now`, the MR is attempted immediately. Once the error is
    /// cleared the retry has happened: an attempt that cannot start (target
    /// busy, tracker error) is reported as [`RetryAttempt::Refused`].
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` if the MR does not exist
    /// - `Error::NotFailed` unless the MR is `open` with a recorded error
    pub async fn retry(&self, id: &str, now: bool) -> Result<RetryOutcome> {
        let mr = self.repo.get(id).await?;
        if !mr.is_failed() {
            return Err(Error::NotFailed {
                id: id.to_string(),
                status: mr.status,
            });
        }

        let cleared = self.repo.clear_error(id).await?;
        info!(mr_id = %id, previous_error = ?mr.error, "Merge request queued for retry");

        let attempt = if now {
            match self.process_mr(id).await {
                Ok(result) => RetryAttempt::Ran(result),
                Err(e) => {
                    warn!(mr_id = %id, error = %e, "Immediate attempt not made; left queued");
                    RetryAttempt::Refused(e)
                }
            }
        } else {
            RetryAttempt::NotRequested
        };
        Ok(RetryOutcome {
            mr: cleared,
            attempt,
        })
    }

    /// Reject an MR by identifier or branch name.
    ///
    /// The source issue is never touched. A failed notification does not
    /// undo the rejection.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if `reason` is blank
    /// - `Error::NotFound` if nothing matches
    /// - `Error::InvalidTransition` if the MR is not `open`
    pub async fn reject(
        &self,
        id_or_branch: &str,
        reason: &str,
        notify: bool,
    ) -> Result<RejectOutcome> {
        if reason.trim().is_empty() {
            return Err(Error::Validation(
                "a rejection reason is required".to_string(),
            ));
        }

        let mr = self.repo.resolve(id_or_branch).await?;
        let rejected = self.repo.reject(&mr.id, reason).await?;
        info!(mr_id = %rejected.id, branch = %rejected.branch, reason = %reason, "Merge request rejected");

        let notification = if notify {
            self.notify_rejection(&rejected, reason).await
        } else {
            Notification::NotRequested
        };
        Ok(RejectOutcome {
            mr: rejected,
            notification,
        })
    }

    async fn notify_rejection(&self, mr: &MergeRequest, reason: &str) -> Notification {
        if mr.worker.is_empty() {
            return Notification::Skipped {
                reason: "no worker recorded for this merge request".to_string(),
            };
        }

        let address = worker_address(&mr.rig, &mr.worker);
        let subject = format!("Merge request rejected: {}", mr.branch);
        let body = format!(
            "Your merge request {} ({} -> {}) was rejected.\n\nReason: {reason}\n\nSource issue {} remains open.",
            mr.id, mr.branch, mr.target, mr.source_issue
        );
        match self.mailer.send(&address, &subject, &body).await {
            Ok(()) => Notification::Sent { address },
            Err(e) => {
                warn!(mr_id = %mr.id, to = %address, error = %e, "Rejection notice not delivered");
                Notification::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        git::MergeError,
        mr::fields::MrFields,
        tracker::{IssueStatus, IssueType, MemoryTracker, NewIssue, Priority},
    };

    #[derive(Default)]
    struct ScriptedMerger {
        failures: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Merger for ScriptedMerger {
        async fn merge(&self, _mr: &MergeRequest) -> std::result::Result<(), MergeError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.failures.lock().ok().and_then(|mut f| f.pop());
            next.map_or(Ok(()), |msg| Err(MergeError::Conflict(msg)))
        }
    }

    #[derive(Default)]
    struct NullMailer;

    #[async_trait]
    impl Mailer for NullMailer {
        async fn send(&self, _address: &str, _subject: &str, _body: &str) -> Result<()> {
            Ok(())
        }
    }

    fn engine(merger: ScriptedMerger) -> (Refinery, Arc<dyn IssueTracker>) {
        let tracker: Arc<dyn IssueTracker> = Arc::new(MemoryTracker::default());
        let refinery = Refinery::new(
            Arc::clone(&tracker),
            Arc::new(merger),
            Arc::new(NullMailer),
            EngineSettings {
                merge_timeout: Duration::from_millis(200),
                stale_claim: Duration::from_secs(1800),
            },
        );
        (refinery, tracker)
    }

    async fn queue(refinery: &Refinery, source: &str, target: &str) -> Result<MergeRequest> {
        queue_blocked(refinery, source, target, &[]).await
    }

    async fn queue_blocked(
        refinery: &Refinery,
        source: &str,
        target: &str,
        blocked_by: &[String],
    ) -> Result<MergeRequest> {
        let fields = MrFields {
            branch: format!("polecat/Nux/{source}"),
            target: target.to_string(),
            source_issue: source.to_string(),
            worker: "Nux".to_string(),
            rig: "gastown".to_string(),
        };
        refinery
            .repository()
            .create(&fields, Priority::P2, blocked_by)
            .await
    }

    #[tokio::test]
    async fn test_successful_merge_closes_mr_and_source() -> Result<()> {
        let (refinery, tracker) = engine(ScriptedMerger::default());
        let source = tracker
            .create(NewIssue::new("work", IssueType::Task, Priority::P2))
            .await?;
        let mr = queue(&refinery, &source.id, "main").await?;

        let report = refinery.process_cycle().await?;
        assert_eq!(report.processed.len(), 1);
        assert!(report.processed.iter().all(ProcessResult::is_merged));

        assert_eq!(refinery.get_mr(&mr.id).await?.status, MrStatus::Closed);
        let source = tracker.show(&source.id).await?;
        assert_eq!(source.map(|i| i.status), Some(IssueStatus::Closed));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_merge_returns_to_open_with_error() -> Result<()> {
        let merger = ScriptedMerger {
            failures: Mutex::new(vec!["CONFLICT in lib.rs".to_string()]),
            ..ScriptedMerger::default()
        };
        let (refinery, _) = engine(merger);
        let mr = queue(&refinery, "gt-a1", "main").await?;

        refinery.process_cycle().await?;
        let after = refinery.get_mr(&mr.id).await?;
        assert_eq!(after.status, MrStatus::Open);
        assert_eq!(after.error.as_deref(), Some("merge conflict: CONFLICT in lib.rs"));

        let again = refinery.process_cycle().await?;
        assert!(again.processed.is_empty(), "failed MRs wait for a retry");
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() -> Result<()> {
        let merger = ScriptedMerger {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedMerger::default()
        };
        let (refinery, _) = engine(merger);
        let mr = queue(&refinery, "gt-a1", "main").await?;

        let result = refinery.process_mr(&mr.id).await?;
        assert_eq!(
            result,
            ProcessResult::Failed {
                mr: refinery.get_mr(&mr.id).await?,
                error: "merge attempt timed out after 200ms".to_string(),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_requires_failure() -> Result<()> {
        let (refinery, _) = engine(ScriptedMerger::default());
        let mr = queue(&refinery, "gt-a1", "main").await?;
        assert_eq!(
            refinery.retry(&mr.id, false).await,
            Err(Error::NotFailed {
                id: mr.id.clone(),
                status: MrStatus::Open
            })
        );
        assert_eq!(
            refinery.retry("gt-404", false).await,
            Err(Error::NotFound("gt-404".to_string()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_requires_reason() -> Result<()> {
        let (refinery, _) = engine(ScriptedMerger::default());
        let mr = queue(&refinery, "gt-a1", "main").await?;
        let result = refinery.reject(&mr.id, "  ", false).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_process_mr_refuses_blocked() -> Result<()> {
        let (refinery, _) = engine(ScriptedMerger::default());
        let first = queue(&refinery, "gt-a1", "main").await?;
        let second = queue_blocked(&refinery, "gt-a2", "main", &[first.id.clone()]).await?;
        let result = refinery.process_mr(&second.id).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_reclaim_stale_claims() -> Result<()> {
        let tracker: Arc<dyn IssueTracker> = Arc::new(MemoryTracker::default());
        let refinery = Refinery::new(
            Arc::clone(&tracker),
            Arc::new(ScriptedMerger::default()),
            Arc::new(NullMailer),
            EngineSettings {
                merge_timeout: Duration::from_secs(1),
                stale_claim: Duration::ZERO,
            },
        );
        let mr = queue(&refinery, "gt-a1", "main").await?;
        refinery.repository().claim(&mr).await?;

        let reclaimed = refinery.reclaim_stale().await?;
        assert_eq!(reclaimed.len(), 1);
        let after = refinery.get_mr(&mr.id).await?;
        assert_eq!(after.status, MrStatus::Open);
        assert!(after.is_failed());
        Ok(())
    }
}
