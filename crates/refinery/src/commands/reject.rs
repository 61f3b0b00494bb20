//! `refinery reject <rig> <mr-id-or-branch> --reason ...`

use anyhow::Result;
use refinery_core::refinery::{Notification, RejectOutcome};

use crate::context::Context;

#[derive(Debug, Clone)]
pub struct RejectOptions {
    pub rig: String,
    pub mr: String,
    pub reason: String,
    pub notify: bool,
}

pub async fn run(options: &RejectOptions) -> Result<()> {
    let ctx = Context::load(Some(&options.rig))?;
    let refinery = ctx.refinery().await?;
    let outcome = refinery
        .reject(&options.mr, &options.reason, options.notify)
        .await?;
    print!("{}", render(&outcome, &options.reason));
    Ok(())
}

pub fn render(outcome: &RejectOutcome, reason: &str) -> String {
    let mr = &outcome.mr;
    let mut out = format!(
        "✗ Rejected: {}\n  Worker: {}\n  Reason: {reason}\n",
        mr.branch, mr.worker
    );
    if !mr.source_issue.is_empty() {
        out.push_str(&format!(
            "  Issue:  {} (not closed - work not done)\n",
            mr.source_issue
        ));
    }
    match &outcome.notification {
        Notification::NotRequested => {}
        Notification::Sent { address } => {
            out.push_str(&format!("  Worker notified via mail ({address})\n"));
        }
        Notification::Skipped { reason } => {
            out.push_str(&format!("  Worker not notified: {reason}\n"));
        }
        Notification::Failed { error } => {
            out.push_str(&format!("  Warning: notification failed: {error}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use refinery_core::{
        mr::{MergeRequest, MrStatus},
        tracker::Priority,
    };

    use super::*;

    fn rejected() -> MergeRequest {
        let now = Utc::now();
        MergeRequest {
            id: "gt-9".to_string(),
            branch: "polecat/Toast/gt-42".to_string(),
            target: "main".to_string(),
            source_issue: "gt-42".to_string(),
            worker: "Toast".to_string(),
            rig: "gastown".to_string(),
            priority: Priority::P2,
            status: MrStatus::Rejected,
            blocked_by: Vec::new(),
            error: None,
            rejection_reason: Some("tests fail".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_render_notified() {
        let out = render(
            &RejectOutcome {
                mr: rejected(),
                notification: Notification::Sent {
                    address: "gastown/Toast".to_string(),
                },
            },
            "tests fail",
        );
        assert_eq!(
            out,
            "✗ Rejected: polecat/Toast/gt-42\n  Worker: Toast\n  Reason: tests fail\n  Issue:  gt-42 (not closed - work not done)\n  Worker notified via mail (gastown/Toast)\n"
        );
    }

    #[test]
    fn test_render_without_notify() {
        let out = render(
            &RejectOutcome {
                mr: rejected(),
                notification: Notification::NotRequested,
            },
            "tests fail",
        );
        assert!(!out.contains("notified"));
    }
}
