//! `refinery run <rig>` - processing cycles on a timer.

use std::fmt::Write as _;

use anyhow::Result;
use refinery_core::refinery::{CycleReport, ProcessResult};
use tokio::time::MissedTickBehavior;

use crate::context::Context;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub rig: String,
    pub once: bool,
}

pub async fn run(options: &RunOptions) -> Result<()> {
    let ctx = Context::load(Some(&options.rig))?;
    let refinery = ctx.refinery().await?;

    if options.once {
        let report = refinery.process_cycle().await?;
        print!("{}", render(&report));
        return Ok(());
    }

    let interval = ctx.config.refinery.poll_interval();
    eprintln!(
        "Refinery for '{}' polling every {}s; Ctrl+C to stop",
        ctx.rig_name,
        interval.as_secs()
    );

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                // The cycle always runs to completion; shutdown is checked between cycles.
                match refinery.process_cycle().await {
                    Ok(report) if report.is_idle() => {
                        tracing::debug!(rig = %ctx.rig_name, "Nothing to process");
                    }
                    Ok(report) => print!("{}", render(&report)),
                    Err(e) => tracing::warn!(rig = %ctx.rig_name, error = %e, "Cycle failed"),
                }
            }
        }
    }

    eprintln!("Refinery stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, stopping after the current cycle");
            }
            () = async {
                match sigterm.as_mut() {
                    Some(sig) => { sig.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                tracing::info!("Received SIGTERM, stopping after the current cycle");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received Ctrl+C, stopping after the current cycle");
    }
}

pub fn render(report: &CycleReport) -> String {
    if report.is_idle() && report.busy_targets.is_empty() {
        return "No merge requests ready\n".to_string();
    }

    let mut out = String::new();
    for mr in &report.reclaimed {
        let _ = writeln!(out, "↺ Reclaimed {} ({}): claim went stale", mr.id, mr.branch);
    }
    for result in &report.processed {
        match result {
            ProcessResult::Merged(mr) => {
                let _ = writeln!(out, "✓ Merged {} ({} -> {})", mr.id, mr.branch, mr.target);
            }
            ProcessResult::Failed { mr, error } => {
                let _ = writeln!(out, "✗ Failed {} ({}): {error}", mr.id, mr.branch);
            }
        }
    }
    for target in &report.busy_targets {
        let _ = writeln!(out, "  Busy: {target}");
    }
    for (target, error) in &report.errors {
        let _ = writeln!(out, "  Error on {target}: {error}");
    }
    out
}
