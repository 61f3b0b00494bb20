//! `refinery list <rig>` - the queue as a table or JSON.

use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Utc};
use refinery_core::{
    mr::MergeRequest,
    queue::{waiting_on, QueueFilter, StatusSelection},
};

use super::{format_age, truncate};
use crate::context::Context;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub rig: String,
    pub filter: QueueFilter,
    pub json: bool,
}

pub async fn run(options: &ListOptions) -> Result<()> {
    let ctx = Context::load(Some(&options.rig))?;
    let repo = ctx.repository().await?;
    let mrs = match options.filter.status {
        StatusSelection::Ready => repo.ready().await?,
        _ => repo.list(None).await?,
    };
    let mrs = options.filter.apply(mrs);

    if options.json {
        println!("{}", serde_json::to_string_pretty(&mrs)?);
    } else {
        print!("{}", render(&ctx.rig_name, &mrs, Utc::now()));
    }
    Ok(())
}

fn row(id: &str, status: &str, priority: &str, branch: &str, worker: &str, age: &str) -> String {
    format!("  {id:<12} {status:<12} {priority:<8} {branch:<30} {worker:<10} {age}\n")
}

/// Human-readable queue table.
pub fn render(rig: &str, mrs: &[MergeRequest], now: DateTime<Utc>) -> String {
    let mut out = format!("Merge queue for '{rig}':\n\n");
    if mrs.is_empty() {
        out.push_str("  (empty)\n");
        return out;
    }

    out.push_str(&row("ID", "STATUS", "PRIORITY", "BRANCH", "WORKER", "AGE"));
    let _ = writeln!(out, "  {}", "-".repeat(90));

    for mr in mrs {
        let id: String = mr.id.chars().take(12).collect();
        out.push_str(&row(
            &id,
            mr.effective_status().as_str(),
            &mr.priority.to_string(),
            &truncate(&mr.branch, 30),
            &mr.worker,
            &format_age(mr.created_at, now),
        ));
        if let Some(blocker) = waiting_on(mr) {
            let _ = writeln!(out, "               (waiting on {blocker})");
        }
    }
    out
}
