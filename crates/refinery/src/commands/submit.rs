//! `refinery submit` - queue the current branch.

use anyhow::Result;
use refinery_core::{
    git::current_branch,
    mr::MergeRequest,
    queue::{submit, SubmitRequest},
};

use crate::context::Context;

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub branch: Option<String>,
    pub issue: Option<String>,
    pub epic: Option<String>,
    pub priority: Option<u32>,
    pub blocked_by: Vec<String>,
    pub rig: Option<String>,
}

pub async fn run(options: SubmitOptions) -> Result<()> {
    let ctx = Context::load(options.rig.as_deref())?;

    let branch = match options.branch {
        Some(branch) => branch,
        None => {
            let cwd = std::env::current_dir().map_err(refinery_core::Error::from)?;
            current_branch(&cwd)?
        }
    };

    let repo = ctx.repository().await?;
    let mr = submit(
        &repo,
        SubmitRequest {
            branch,
            issue: options.issue,
            epic: options.epic,
            priority: options.priority,
            blocked_by: options.blocked_by,
            rig: ctx.rig_name.clone(),
            main_branch: ctx.config.refinery.main_branch.clone(),
        },
    )
    .await?;

    print!("{}", render(&mr));
    Ok(())
}

pub fn render(mr: &MergeRequest) -> String {
    let mut out = format!(
        "✓ Created merge request\n  MR ID: {}\n  Source: {}\n  Target: {}\n  Issue: {}\n",
        mr.id, mr.branch, mr.target, mr.source_issue
    );
    if !mr.worker.is_empty() {
        out.push_str(&format!("  Worker: {}\n", mr.worker));
    }
    out.push_str(&format!("  Priority: {}\n", mr.priority));
    if !mr.blocked_by.is_empty() {
        out.push_str(&format!("  Blocked by: {}\n", mr.blocked_by.join(", ")));
    }
    out
}
