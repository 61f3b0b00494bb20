//! Merge request state machine (pure domain logic)
//!
//! ```text
//! open ──claim──> in_progress ──merged──> closed
//!  │  ^                │
//!  │  └──── failed ────┘   (error recorded)
//!  │
//!  └──reject──> rejected
//!
//! open(error) ──retry──> open(no error)
//! ```
//!
//! Terminal states: `closed`, `rejected`. `ready` and `blocked` are derived
//! at read time (see [`EffectiveStatus`]) and never stored.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fields::{self, MrFields};
use crate::tracker::{Issue, IssueStatus, Priority};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STATE MACHINE ERROR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error type for invalid merge request state transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid state transition: cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub from: MrStatus,
    pub to: MrStatus,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STORED STATUS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persisted lifecycle state of a merge request.
///
/// Valid transitions:
/// - open -> `in_progress` (selected for processing)
/// - `in_progress` -> closed (merge landed)
/// - `in_progress` -> open (merge failed, error recorded)
/// - open -> rejected (administrative rejection)
/// - open -> open (retry clears the error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MrStatus {
    /// Waiting to be processed (ready or blocked, see [`EffectiveStatus`]).
    Open,
    /// A merge attempt is running.
    InProgress,
    /// Merged into the target branch.
    Closed,
    /// Rejected without merging.
    Rejected,
}

impl MrStatus {
    /// Returns the string representation of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
            Self::Rejected => "rejected",
        }
    }

    /// Returns true if this status has no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Rejected)
    }

    /// Returns true if a transition from `self` to `target` is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        self.validate_transition(target).is_ok()
    }

    /// Validates that a transition from `self` to `target` is allowed.
    pub fn validate_transition(&self, target: Self) -> std::result::Result<(), TransitionError> {
        let is_valid = match self {
            Self::Open => matches!(target, Self::Open | Self::InProgress | Self::Rejected),
            Self::InProgress => matches!(target, Self::Open | Self::Closed),
            Self::Closed | Self::Rejected => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError {
                from: *self,
                to: target,
            })
        }
    }

    /// Returns all statuses.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Open, Self::InProgress, Self::Closed, Self::Rejected]
    }
}

impl fmt::Display for MrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MrStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(crate::Error::Validation(format!(
                "invalid merge request status '{s}' (expected open, in_progress, closed or rejected)"
            ))),
        }
    }
}

impl From<IssueStatus> for MrStatus {
    fn from(status: IssueStatus) -> Self {
        match status {
            IssueStatus::Open => Self::Open,
            IssueStatus::InProgress => Self::InProgress,
            IssueStatus::Closed => Self::Closed,
            IssueStatus::Rejected => Self::Rejected,
        }
    }
}

impl From<MrStatus> for IssueStatus {
    fn from(status: MrStatus) -> Self {
        match status {
            MrStatus::Open => Self::Open,
            MrStatus::InProgress => Self::InProgress,
            MrStatus::Closed => Self::Closed,
            MrStatus::Rejected => Self::Rejected,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EFFECTIVE (DISPLAY) STATUS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Status as shown to operators: `open` is split into ready and blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Ready,
    Blocked,
    InProgress,
    Closed,
    Rejected,
}

impl EffectiveStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Blocked => "blocked",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MERGE REQUEST
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A queued request to merge one branch into one target branch.
///
/// Built from a tracker [`Issue`] whose description carries the
/// `type: merge-request` marker. Decoded fields that are missing are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: String,
    pub branch: String,
    pub target: String,
    pub source_issue: String,
    pub worker: String,
    pub rig: String,
    pub priority: Priority,
    pub status: MrStatus,
    /// Unresolved blockers (MRs not yet closed), in dependency order.
    pub blocked_by: Vec<String>,
    /// Last failure message; `None` if never failed or retried since.
    pub error: Option<String>,
    /// Reason recorded when the MR was rejected.
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MergeRequest {
    /// Decode a tracker issue; `None` if it is not a merge request.
    #[must_use]
    pub fn from_issue(issue: &Issue) -> Option<Self> {
        fields::decode(&issue.description).map(|f| Self::from_parts(issue, f))
    }

    fn from_parts(issue: &Issue, fields: MrFields) -> Self {
        let status = MrStatus::from(issue.status);
        Self {
            id: issue.id.clone(),
            branch: fields.branch,
            target: fields.target,
            source_issue: fields.source_issue,
            worker: fields.worker,
            rig: fields.rig,
            priority: issue.priority,
            status,
            blocked_by: issue.blocked_by.clone(),
            error: issue.notes.clone().filter(|n| !n.is_empty()),
            rejection_reason: issue
                .close_reason
                .clone()
                .filter(|_| status == MrStatus::Rejected),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
        }
    }

    /// Status shown to operators.
    ///
    /// Terminal and `in_progress` records keep their stored status; an open
    /// record is blocked while any blocker is unresolved, otherwise ready.
    #[must_use]
    pub fn effective_status(&self) -> EffectiveStatus {
        match self.status {
            MrStatus::Open if self.blocked_by.is_empty() => EffectiveStatus::Ready,
            MrStatus::Open => EffectiveStatus::Blocked,
            MrStatus::InProgress => EffectiveStatus::InProgress,
            MrStatus::Closed => EffectiveStatus::Closed,
            MrStatus::Rejected => EffectiveStatus::Rejected,
        }
    }

    /// Eligible for selection: open, unblocked, and no recorded failure.
    ///
    /// A failed MR still shows as ready but waits for an explicit retry.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.effective_status() == EffectiveStatus::Ready && self.error.is_none()
    }

    /// Open with a recorded failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == MrStatus::Open && self.error.is_some()
    }
}
