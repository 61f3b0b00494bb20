//! Error types for refinery-core
//!
//! Errors fall into three groups:
//!
//! - **User errors**: bad input or a request the queue cannot honour
//!   (`Validation`, `NotFound`, `NotFailed`, `InvalidTransition`)
//! - **Merge errors**: a merge attempt that ran and did not land
//!   (`MergeFailed`, `TargetBusy`)
//! - **Collaborator errors**: the tracker, git, mail or the filesystem failed
//!   (`Tracker`, `Git`, `Mail`, `Config`, `Io`)

use thiserror::Error;

use crate::mr::types::{MrStatus, TransitionError};

/// Core error type for merge-queue operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// No merge request matches the identifier or branch.
    #[error("merge request not found: {0}")]
    NotFound(String),

    /// Retry requested on a merge request that has not failed.
    #[error("merge request '{id}' has not failed (status: {status})")]
    NotFailed { id: String, status: MrStatus },

    /// A merge attempt ran and did not land.
    #[error("merge failed: {0}")]
    MergeFailed(String),

    /// Malformed submission or command input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested state change is not allowed by the MR state machine.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Another merge request already holds the target branch.
    #[error("target branch '{target}' is busy with {holder}")]
    TargetBusy { target: String, holder: String },

    /// The issue tracker failed.
    #[error("issue tracker error: {0}")]
    Tracker(String),

    /// A git operation failed outside a merge attempt.
    #[error("git error: {0}")]
    Git(String),

    /// Mail dispatch failed.
    #[error("mail error: {0}")]
    Mail(String),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Process exit code for this error.
    ///
    /// - 1: validation errors
    /// - 2: not found / not failed / invalid transition
    /// - 3: collaborator and system failures
    /// - 4: merge failures
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 1,
            Self::NotFound(_) | Self::NotFailed { .. } | Self::InvalidTransition(_) => 2,
            Self::Tracker(_) | Self::Git(_) | Self::Mail(_) | Self::Config(_) | Self::Io(_) => 3,
            Self::MergeFailed(_) | Self::TargetBusy { .. } => 4,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Tracker(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for refinery-core operations
pub type Result<T> = std::result::Result<T, Error>;
