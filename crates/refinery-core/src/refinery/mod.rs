//! Refinery: the per-rig merge processor.

pub mod engine;
pub mod locks;
pub mod selection;

pub use engine::{
    CycleReport, EngineSettings, Notification, ProcessResult, Refinery, RejectOutcome,
    RetryAttempt, RetryOutcome,
};
pub use locks::{TargetGuard, TargetLocks};
pub use selection::{busy_targets, next_for_target, plan, processing_order};
