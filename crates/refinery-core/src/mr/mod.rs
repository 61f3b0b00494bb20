//! Merge request domain: field codec, branch parsing, and the MR state machine.

pub mod branch;
pub mod fields;
pub mod types;

pub use branch::{parse_branch, BranchInfo};
pub use fields::{decode, encode, MrFields, TYPE_MARKER};
pub use types::{EffectiveStatus, MergeRequest, MrStatus, TransitionError};
