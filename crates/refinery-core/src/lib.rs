//! # Refinery Core
//!
//! Merge-queue state engine: merge requests stored as tracker issues,
//! processed one at a time per target branch.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Layout
//!
//! - [`mr`]: field codec, branch parser, MR state machine
//! - [`tracker`]: issue store trait with memory and `SQLite` backends
//! - [`queue`]: MR repository, queue view, submission
//! - [`refinery`]: selection policy, target locks, processing engine
//! - [`git`], [`mail`]: collaborators used by the engine
//! - [`config`]: layered configuration

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod config;
mod error;
pub mod git;
pub mod mail;
pub mod mr;
pub mod queue;
pub mod refinery;
pub mod tracker;

pub use error::{Error, Result};
