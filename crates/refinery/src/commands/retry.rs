//! `refinery retry <rig> <mr-id>` - clear a failure and requeue.

use anyhow::Result;
use refinery_core::{
    refinery::{ProcessResult, RetryAttempt},
    Error,
};

use crate::context::Context;

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub rig: String,
    pub mr_id: String,
    pub now: bool,
}

pub async fn run(options: &RetryOptions) -> Result<()> {
    let ctx = Context::load(Some(&options.rig))?;
    let refinery = ctx.refinery().await?;

    let mr = refinery.get_mr(&options.mr_id).await?;
    println!("Retrying merge request: {}", mr.id);
    println!("  Branch: {}", mr.branch);
    println!("  Worker: {}", mr.worker);
    if let Some(error) = &mr.error {
        println!("  Previous error: {error}");
    }

    let outcome = refinery.retry(&options.mr_id, options.now).await?;
    match outcome.attempt {
        RetryAttempt::Ran(ProcessResult::Merged(merged)) => {
            println!("✓ Merge request processed");
            println!("  Merged into {}", merged.target);
            Ok(())
        }
        RetryAttempt::Ran(ProcessResult::Failed { error, .. }) => {
            println!("✗ Merge attempt failed");
            Err(Error::MergeFailed(error).into())
        }
        RetryAttempt::Refused(error) => {
            println!("✓ Merge request queued for retry");
            println!("  Immediate attempt not made: {error}");
            println!("  Will be processed on next refinery cycle");
            Ok(())
        }
        RetryAttempt::NotRequested => {
            println!("✓ Merge request queued for retry");
            println!("  Will be processed on next refinery cycle");
            Ok(())
        }
    }
}
