//! Queue View - derived status and filtering over MR records.
//!
//! Everything here is a pure projection: records are never mutated, and the
//! repository's order is preserved. Processing order belongs to
//! [`crate::refinery::selection`].

use crate::{
    mr::types::{EffectiveStatus, MergeRequest, MrStatus},
    tracker::Issue,
};

/// Prefix of epic integration branches.
pub const INTEGRATION_PREFIX: &str = "integration/";

/// Decode the MR records among `issues`, skipping everything else.
#[must_use]
pub fn merge_requests(issues: &[Issue]) -> Vec<MergeRequest> {
    issues.iter().filter_map(MergeRequest::from_issue).collect()
}

/// MR records among `issues` eligible for processing.
///
/// The store's own notion of ready covers every issue type; the type check
/// happens before derived status is computed. Failed MRs are left out until
/// retried.
#[must_use]
pub fn ready(issues: &[Issue]) -> Vec<MergeRequest> {
    merge_requests(issues)
        .into_iter()
        .filter(MergeRequest::is_ready)
        .collect()
}

/// Which stored/derived states a listing includes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusSelection {
    /// Everything not yet closed or rejected.
    #[default]
    Active,
    /// Exactly one stored status.
    Stored(MrStatus),
    /// Eligible for processing: ready and not failed.
    Ready,
    /// No restriction.
    All,
}

impl StatusSelection {
    #[must_use]
    pub fn matches(&self, mr: &MergeRequest) -> bool {
        match self {
            Self::Active => !mr.status.is_terminal(),
            Self::Stored(status) => mr.status == *status,
            Self::Ready => mr.is_ready(),
            Self::All => true,
        }
    }
}

/// Composable listing filter; all set criteria must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub status: StatusSelection,
    /// Case-insensitive exact worker match.
    pub worker: Option<String>,
    /// Matches MRs targeting `integration/<epic>`.
    pub epic: Option<String>,
}

impl QueueFilter {
    #[must_use]
    pub fn matches(&self, mr: &MergeRequest) -> bool {
        self.status.matches(mr)
            && self
                .worker
                .as_deref()
                .is_none_or(|w| !mr.worker.is_empty() && mr.worker.eq_ignore_ascii_case(w))
            && self
                .epic
                .as_deref()
                .is_none_or(|e| mr.target == integration_branch(e))
    }

    /// Records passing the filter, in input order.
    #[must_use]
    pub fn apply(&self, mrs: Vec<MergeRequest>) -> Vec<MergeRequest> {
        mrs.into_iter().filter(|mr| self.matches(mr)).collect()
    }
}

/// Integration branch for an epic.
#[must_use]
pub fn integration_branch(epic: &str) -> String {
    format!("{INTEGRATION_PREFIX}{epic}")
}

/// First unresolved blocker, for "waiting on" hints.
#[must_use]
pub fn waiting_on(mr: &MergeRequest) -> Option<&str> {
    if mr.effective_status() == EffectiveStatus::Blocked {
        mr.blocked_by.first().map(String::as_str)
    } else {
        None
    }
}
