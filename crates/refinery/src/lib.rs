//! Refinery - merge queue for agent work branches
//!
//! Thin command layer over `refinery-core`: argument parsing, rig
//! resolution and terminal output.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cli;
pub mod commands;
pub mod context;
