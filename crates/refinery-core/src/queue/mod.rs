//! The merge queue: storage, read-side projection and submission.

pub mod repository;
pub mod submit;
pub mod view;

pub use repository::{target_label, Claim, MrRepository};
pub use submit::{submit, SubmitRequest};
pub use view::{integration_branch, waiting_on, QueueFilter, StatusSelection};
