//! Submission: turn a finished branch into a queued merge request.

use tracing::{debug, warn};

use super::{repository::MrRepository, view::integration_branch};
use crate::{
    mr::{branch::parse_branch, fields::MrFields, types::MergeRequest},
    tracker::Priority,
    Error, Result,
};

const PROTECTED_BRANCHES: [&str; 2] = ["main", "master"];

/// Everything a submission needs; `None` fields are derived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitRequest {
    pub branch: String,
    /// Source issue override; otherwise parsed from the branch.
    pub issue: Option<String>,
    /// Target `integration/<epic>` instead of the main branch.
    pub epic: Option<String>,
    /// Explicit priority 0-4; otherwise inherited from the source issue.
    pub priority: Option<u32>,
    /// MR identifiers that must merge first.
    pub blocked_by: Vec<String>,
    pub rig: String,
    pub main_branch: String,
}

/// Validate, derive and store a new MR.
///
/// # Errors
///
/// - `Error::Validation` for a protected or empty branch, an underivable
///   source issue, an out-of-range priority, or multi-line values
/// - `Error::NotFound` if a `blocked_by` entry is not a known MR
pub async fn submit(repo: &MrRepository, request: SubmitRequest) -> Result<MergeRequest> {
    let branch = request.branch.trim();
    validate_branch(branch, &request.main_branch)?;

    let parsed = parse_branch(branch);
    let source_issue = request
        .issue
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map_or(parsed.issue, ToString::to_string);
    if source_issue.is_empty() {
        return Err(Error::Validation(format!(
            "cannot determine source issue from branch '{branch}'; use --issue to specify"
        )));
    }

    let target = match request.epic.as_deref().map(str::trim) {
        Some("") => return Err(Error::Validation("epic must not be empty".to_string())),
        Some(epic) => integration_branch(epic),
        None => request.main_branch.clone(),
    };

    if request.rig.trim().is_empty() {
        return Err(Error::Validation("rig must not be empty".to_string()));
    }

    let fields = MrFields {
        branch: branch.to_string(),
        target,
        source_issue,
        worker: parsed.worker,
        rig: request.rig.trim().to_string(),
    };
    ensure_single_line(&fields)?;

    let priority = match request.priority {
        Some(p) => Priority::from_u32(p).ok_or_else(|| {
            Error::Validation(format!("priority must be between 0 and 4, got {p}"))
        })?,
        None => inherited_priority(repo, &fields.source_issue).await?,
    };

    for blocker in &request.blocked_by {
        repo.get(blocker).await?;
    }

    repo.create(&fields, priority, &request.blocked_by).await
}

fn validate_branch(branch: &str, main_branch: &str) -> Result<()> {
    if branch.is_empty() {
        return Err(Error::Validation("branch must not be empty".to_string()));
    }
    if PROTECTED_BRANCHES.contains(&branch) || branch == main_branch {
        return Err(Error::Validation(format!(
            "cannot submit {branch} branch to merge queue"
        )));
    }
    Ok(())
}

fn ensure_single_line(fields: &MrFields) -> Result<()> {
    let values = [
        ("branch", &fields.branch),
        ("target", &fields.target),
        ("issue", &fields.source_issue),
        ("rig", &fields.rig),
    ];
    match values.iter().find(|(_, v)| v.contains(['\n', '\r'])) {
        Some((name, _)) => Err(Error::Validation(format!(
            "{name} must be a single line"
        ))),
        None => Ok(()),
    }
}

/// Priority of the source issue, or P2 when it is unknown.
async fn inherited_priority(repo: &MrRepository, source_issue: &str) -> Result<Priority> {
    match repo.tracker().show(source_issue).await? {
        Some(issue) => {
            debug!(source_issue = %source_issue, priority = %issue.priority, "Inheriting priority");
            Ok(issue.priority)
        }
        None => {
            warn!(source_issue = %source_issue, "Source issue not found, using default priority");
            Ok(Priority::default())
        }
    }
}
