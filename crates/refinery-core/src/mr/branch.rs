//! Branch name parsing.
//!
//! Two conventions are recognised, in order:
//! 1. `polecat/<worker>/<issue>` where `<issue>` may itself contain `/`
//! 2. the first issue-like token anywhere in the name (`gt-abc123`, `gt-abc123.2`)
//!
//! Parsing is total: anything unrecognised yields empty strings.

use std::sync::OnceLock;

use regex::Regex;

const WORKER_PREFIX: &str = "polecat/";

fn issue_pattern() -> Option<&'static Regex> {
    static ISSUE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    ISSUE_PATTERN
        .get_or_init(|| Regex::new(r"[a-z]+-[a-z0-9]+(?:\.[0-9]+)?").ok())
        .as_ref()
}

/// Worker and source issue derived from a branch name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchInfo {
    pub worker: String,
    pub issue: String,
}

/// Derive `{worker, issue}` from a branch name.
#[must_use]
pub fn parse_branch(branch: &str) -> BranchInfo {
    if branch.starts_with(WORKER_PREFIX) {
        let parts: Vec<&str> = branch.splitn(3, '/').collect();
        if let [_, worker, issue] = parts.as_slice() {
            return BranchInfo {
                worker: (*worker).to_string(),
                issue: (*issue).to_string(),
            };
        }
    }

    issue_pattern()
        .and_then(|re| re.find(branch))
        .map(|m| BranchInfo {
            worker: String::new(),
            issue: m.as_str().to_string(),
        })
        .unwrap_or_default()
}
