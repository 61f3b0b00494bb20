//! `refinery show <rig> <mr-id>` - one full record.

use std::fmt::Write as _;

use anyhow::Result;
use refinery_core::mr::MergeRequest;

use crate::context::Context;

#[derive(Debug, Clone)]
pub struct ShowOptions {
    pub rig: String,
    pub mr_id: String,
    pub json: bool,
}

pub async fn run(options: &ShowOptions) -> Result<()> {
    let ctx = Context::load(Some(&options.rig))?;
    let refinery = ctx.refinery().await?;
    let mr = refinery.get_mr(&options.mr_id).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&mr)?);
    } else {
        print!("{}", render(&mr));
    }
    Ok(())
}

pub fn render(mr: &MergeRequest) -> String {
    let mut out = format!("Merge request {}\n", mr.id);
    let mut field = |name: &str, value: &str| {
        if !value.is_empty() {
            let _ = writeln!(out, "  {:<10} {value}", format!("{name}:"));
        }
    };
    field("Status", mr.effective_status().as_str());
    field("Branch", &mr.branch);
    field("Target", &mr.target);
    field("Issue", &mr.source_issue);
    field("Worker", &mr.worker);
    field("Rig", &mr.rig);
    field("Priority", &mr.priority.to_string());
    field("Created", &mr.created_at.to_rfc3339());
    field("Updated", &mr.updated_at.to_rfc3339());
    field("Blocked by", &mr.blocked_by.join(", "));
    field("Error", mr.error.as_deref().unwrap_or_default());
    field("Rejected", mr.rejection_reason.as_deref().unwrap_or_default());
    out
}
