//! Git collaborator.
//!
//! - [`current_branch`]: branch detection for submission (libgit2)
//! - [`Merger`]: the merge attempt, a black box that lands a branch or
//!   explains why not
//! - [`GitCliMerger`]: fetch, merge `--no-ff`, push via the `git` binary

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{process::Command, sync::Mutex};
use tracing::{debug, warn};

use crate::{mr::types::MergeRequest, Error, Result};

/// Name of the branch checked out in the repository containing `path`.
///
/// # Errors
///
/// `Error::Git` if `path` is not inside a repository or HEAD is detached.
pub fn current_branch(path: &Path) -> Result<String> {
    let repo = git2::Repository::discover(path)
        .map_err(|e| Error::Git(format!("not a git repository ({}): {e}", path.display())))?;
    let head = repo
        .head()
        .map_err(|e| Error::Git(format!("cannot read HEAD: {e}")))?;
    if !head.is_branch() {
        return Err(Error::Git("HEAD is detached; use --branch".to_string()));
    }
    head.shorthand()
        .map(ToString::to_string)
        .ok_or_else(|| Error::Git("branch name is not valid UTF-8".to_string()))
}

/// Why a merge attempt did not land.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("merge conflict: {0}")]
    Conflict(String),

    #[error("git fetch failed: {0}")]
    FetchFailed(String),

    #[error("push rejected: {0}")]
    PushRejected(String),

    #[error("git command failed: {0}")]
    CommandFailed(String),
}

/// Performs one merge attempt for an MR.
///
/// Implementations hold no state between attempts; a retry starts over.
#[async_trait]
pub trait Merger: Send + Sync {
    async fn merge(&self, mr: &MergeRequest) -> std::result::Result<(), MergeError>;
}

/// Merges with the `git` command line inside a working copy.
///
/// Every target shares the one checkout, so attempts run one at a time;
/// clones share the lock.
#[derive(Debug, Clone)]
pub struct GitCliMerger {
    repo_path: PathBuf,
    remote: String,
    worktree: Arc<Mutex<()>>,
}

impl GitCliMerger {
    #[must_use]
    pub fn new(repo_path: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            remote: remote.into(),
            worktree: Arc::new(Mutex::new(())),
        }
    }

    async fn git(&self, args: &[&str]) -> std::result::Result<String, String> {
        debug!(args = ?args, "Running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to execute git: {e}"))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            // git merge reports conflicts on stdout
            Err(format!("{}\n{}", stderr.trim(), stdout.trim())
                .trim()
                .to_string())
        }
    }
}

#[async_trait]
impl Merger for GitCliMerger {
    async fn merge(&self, mr: &MergeRequest) -> std::result::Result<(), MergeError> {
        let remote_target = format!("{}/{}", self.remote, mr.target);
        let remote_branch = format!("{}/{}", self.remote, mr.branch);
        let message = format!("Merge {} into {} ({})", mr.branch, mr.target, mr.id);

        let _worktree = self.worktree.lock().await;
        debug!(mr_id = %mr.id, target_branch = %mr.target, "Working copy acquired");

        self.git(&["fetch", "--prune", &self.remote])
            .await
            .map_err(MergeError::FetchFailed)?;

        self.git(&["checkout", "-B", &mr.target, &remote_target])
            .await
            .map_err(MergeError::CommandFailed)?;

        if let Err(output) = self
            .git(&["merge", "--no-ff", "-m", &message, &remote_branch])
            .await
        {
            if let Err(abort) = self.git(&["merge", "--abort"]).await {
                warn!(mr_id = %mr.id, error = %abort, "git merge --abort failed");
            }
            return Err(if is_conflict_error(&output) {
                MergeError::Conflict(output)
            } else {
                MergeError::CommandFailed(output)
            });
        }

        self.git(&["push", &self.remote, &mr.target])
            .await
            .map_err(MergeError::PushRejected)?;
        Ok(())
    }
}

fn is_conflict_error(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("conflict") || lower.contains("automatic merge failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        assert!(is_conflict_error(
            "CONFLICT (content): Merge conflict in src/lib.rs"
        ));
        assert!(is_conflict_error(
            "Automatic merge failed; fix conflicts and then commit the result."
        ));
        assert!(!is_conflict_error("fatal: couldn't find remote ref"));
    }

    #[test]
    fn test_merge_error_messages() {
        assert_eq!(
            MergeError::PushRejected("non-fast-forward".to_string()).to_string(),
            "push rejected: non-fast-forward"
        );
    }

    #[test]
    fn test_current_branch_outside_repository() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = current_branch(dir.path());
        assert!(matches!(result, Err(Error::Git(_))));
        Ok(())
    }

    #[test]
    fn test_current_branch_reads_head() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let repo = git2::Repository::init(dir.path())?;
        let sig = git2::Signature::now("Test", "test@example.com")?;
        let tree_id = repo.index()?.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let commit = repo.commit(None, &sig, &sig, "init", &tree, &[])?;
        let commit = repo.find_commit(commit)?;
        repo.branch("polecat/Nux/gt-xyz", &commit, false)?;
        repo.set_head("refs/heads/polecat/Nux/gt-xyz")?;

        assert_eq!(current_branch(dir.path())?, "polecat/Nux/gt-xyz");
        Ok(())
    }
}
