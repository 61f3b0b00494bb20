//! Issue tracker domain types
//!
//! - `IssueStatus`: stored workflow states (open, in_progress, closed, rejected)
//! - `IssueType`: issue classifications (task, bug, feature, epic, message, ...)
//! - `Priority`: priority levels (P0-P4) serialized as integers
//! - `Issue`: the generic record every merge request is layered over
//! - `NewIssue`, `IssueUpdate`, `IssueFilter`, `Transition`: tracker requests

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Closed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Bug,
    Feature,
    Task,
    Epic,
    Chore,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
    P4,
}

// ============================================================================
// Priority Serialization & Conversion
// ============================================================================
// Priorities travel as plain integers 0-4 in JSON and in the database.
impl Serialize for Priority {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.to_u32())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        Self::from_u32(value)
            .ok_or_else(|| serde::de::Error::custom(format!("priority out of range: {value}")))
    }
}

impl Priority {
    /// Convert a u32 to a Priority, or None if out of range [0, 4]
    #[must_use]
    pub const fn from_u32(n: u32) -> Option<Self> {
        match n {
            0 => Some(Self::P0),
            1 => Some(Self::P1),
            2 => Some(Self::P2),
            3 => Some(Self::P3),
            4 => Some(Self::P4),
            _ => None,
        }
    }

    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::P0 => 0,
            Self::P1 => 1,
            Self::P2 => 2,
            Self::P3 => 3,
            Self::P4 => 4,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.to_u32())
    }
}

/// A generic tracker record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub issue_type: IssueType,
    pub status: IssueStatus,
    pub priority: Priority,
    pub description: String,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    /// Free-form working notes; merge requests keep their last failure here.
    pub notes: Option<String>,
    pub close_reason: Option<String>,
    /// Dependencies that are not closed yet, resolved at read time.
    pub blocked_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Issue {
    #[must_use]
    pub fn blocked_by_count(&self) -> usize {
        self.blocked_by.len()
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.blocked_by.is_empty()
    }

    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Request to create an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub issue_type: IssueType,
    pub priority: Priority,
    pub description: String,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    /// Issues this one waits on; stored together with the issue.
    pub depends_on: Vec<String>,
}

impl NewIssue {
    #[must_use]
    pub fn new(title: impl Into<String>, issue_type: IssueType, priority: Priority) -> Self {
        Self {
            title: title.into(),
            issue_type,
            priority,
            description: String::new(),
            assignee: None,
            labels: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, depends_on: impl Into<String>) -> Self {
        self.depends_on.push(depends_on.into());
        self
    }
}

/// Field changes applied by `update` and `transition`.
///
/// `notes: Some(None)` clears the notes; `None` leaves them untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    pub status: Option<IssueStatus>,
    pub notes: Option<Option<String>>,
    pub close_reason: Option<String>,
}

impl IssueUpdate {
    #[must_use]
    pub fn status(status: IssueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(Some(notes.into()));
        self
    }

    #[must_use]
    pub fn clear_notes(mut self) -> Self {
        self.notes = Some(None);
        self
    }

    #[must_use]
    pub fn with_close_reason(mut self, reason: impl Into<String>) -> Self {
        self.close_reason = Some(reason.into());
        self
    }

    /// Apply the changes to an in-memory record.
    pub fn apply(&self, issue: &mut Issue, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            issue.status = status;
            issue.closed_at = match status {
                IssueStatus::Closed | IssueStatus::Rejected => Some(now),
                IssueStatus::Open | IssueStatus::InProgress => None,
            };
        }
        if let Some(notes) = &self.notes {
            issue.notes.clone_from(notes);
        }
        if let Some(reason) = &self.close_reason {
            issue.close_reason = Some(reason.clone());
        }
        issue.updated_at = now;
    }
}

/// Conditional status change.
///
/// Applies only if the issue is currently in `from`. With an
/// `exclusive_label`, it also refuses while another issue carrying that
/// label is already in the destination status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: IssueStatus,
    pub update: IssueUpdate,
    pub exclusive_label: Option<String>,
}

impl Transition {
    #[must_use]
    pub const fn new(from: IssueStatus, update: IssueUpdate) -> Self {
        Self {
            from,
            update,
            exclusive_label: None,
        }
    }

    #[must_use]
    pub fn exclusive_on(mut self, label: impl Into<String>) -> Self {
        self.exclusive_label = Some(label.into());
        self
    }
}

/// Result of a conditional transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The change was written; the updated record.
    Applied(Issue),
    /// The issue was not in the expected status.
    StatusMismatch(IssueStatus),
    /// Another issue holds the exclusive label in the destination status.
    Contended { holder: String },
}

/// List filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
    pub issue_type: Option<IssueType>,
    pub status: Option<IssueStatus>,
    pub label: Option<String>,
}

impl IssueFilter {
    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        self.issue_type
            .as_ref()
            .is_none_or(|t| *t == issue.issue_type)
            && self.status.is_none_or(|s| s == issue.status)
            && self.label.as_deref().is_none_or(|l| issue.has_label(l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_serializes_as_integer() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&Priority::P3)?, "3");
        let parsed: Priority = serde_json::from_str("0")?;
        assert_eq!(parsed, Priority::P0);
        assert!(serde_json::from_str::<Priority>("5").is_err());
        Ok(())
    }

    #[test]
    fn test_priority_display_and_default() {
        assert_eq!(Priority::P1.to_string(), "P1");
        assert_eq!(Priority::default(), Priority::P2);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(IssueStatus::InProgress.to_string(), "in_progress");
        assert_eq!("rejected".parse::<IssueStatus>().ok(), Some(IssueStatus::Rejected));
        assert_eq!("message".parse::<IssueType>().ok(), Some(IssueType::Message));
    }
}
