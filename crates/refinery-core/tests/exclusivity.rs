// Integration tests have relaxed clippy settings.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! At most one attempt per target at any time, across concurrent cycles,
//! explicit process requests and separate engines sharing one tracker.

mod common;

use std::{sync::Arc, time::Duration};

use common::{Harness, RecordingMailer, ScriptedMerger};
use futures::future::join_all;
use refinery_core::{
    git::Merger,
    mail::Mailer,
    mr::MrStatus,
    queue::{submit, SubmitRequest},
    refinery::{EngineSettings, Refinery},
    tracker::{IssueTracker, MemoryTracker},
    Error, Result,
};

fn slow() -> ScriptedMerger {
    ScriptedMerger::with_delay(Duration::from_millis(40))
}

#[tokio::test]
async fn concurrent_cycles_never_overlap_on_a_target() -> Result<()> {
    let h = Harness::with(
        Arc::new(MemoryTracker::default()),
        slow(),
        RecordingMailer::default(),
        EngineSettings::default(),
    );
    for i in 0..4 {
        h.submit(&format!("polecat/Nux/gt-m{i}"), 2).await?;
    }

    let cycles = (0..6).map(|_| h.refinery.process_cycle());
    let reports = join_all(cycles).await;
    let processed: usize = reports
        .into_iter()
        .map(|r| r.map(|r| r.processed.len()))
        .sum::<Result<usize>>()?;

    assert_eq!(processed, 1, "one target, one attempt in flight");
    assert!(h.merger.overlaps().is_empty());
    Ok(())
}

#[tokio::test]
async fn distinct_targets_run_in_the_same_cycle() -> Result<()> {
    let h = Harness::with(
        Arc::new(MemoryTracker::default()),
        slow(),
        RecordingMailer::default(),
        EngineSettings::default(),
    );
    h.submit("polecat/Nux/gt-main", 2).await?;
    for epic in ["gt-e1", "gt-e2"] {
        submit(
            h.refinery.repository(),
            SubmitRequest {
                branch: format!("polecat/Nux/{epic}-work"),
                epic: Some(epic.to_string()),
                rig: "gastown".to_string(),
                main_branch: "main".to_string(),
                ..SubmitRequest::default()
            },
        )
        .await?;
    }

    let report = h.refinery.process_cycle().await?;
    assert_eq!(report.processed.len(), 3);
    assert!(report.errors.is_empty());
    assert!(h.merger.overlaps().is_empty());
    Ok(())
}

#[tokio::test]
async fn explicit_process_waits_out_a_running_cycle() -> Result<()> {
    let h = Harness::with(
        Arc::new(MemoryTracker::default()),
        slow(),
        RecordingMailer::default(),
        EngineSettings::default(),
    );
    let first = h.submit("polecat/Nux/gt-x1", 0).await?;
    let second = h.submit("polecat/Nux/gt-x2", 4).await?;

    let (cycle, explicit) = tokio::join!(h.refinery.process_cycle(), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.refinery.process_mr(&second.id).await
    });

    let cycle = cycle?;
    assert_eq!(cycle.processed.len(), 1);
    assert_eq!(cycle.processed[0].mr().id, first.id);
    assert!(explicit?.is_merged());
    assert!(h.merger.overlaps().is_empty());
    assert_eq!(h.merger.attempts().len(), 2);
    Ok(())
}

#[tokio::test]
async fn separate_engines_share_tracker_exclusivity() -> Result<()> {
    let tracker: Arc<dyn IssueTracker> = Arc::new(MemoryTracker::default());
    let merger = Arc::new(slow());
    let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::default());
    let engine = || {
        Refinery::new(
            Arc::clone(&tracker),
            Arc::clone(&merger) as Arc<dyn Merger>,
            Arc::clone(&mailer),
            EngineSettings::default(),
        )
    };
    let (one, two) = (engine(), engine());

    let a = submit(
        one.repository(),
        SubmitRequest {
            branch: "polecat/Nux/gt-a".to_string(),
            rig: "gastown".to_string(),
            main_branch: "main".to_string(),
            ..SubmitRequest::default()
        },
    )
    .await?;
    let b = submit(
        two.repository(),
        SubmitRequest {
            branch: "polecat/Toast/gt-b".to_string(),
            rig: "gastown".to_string(),
            main_branch: "main".to_string(),
            ..SubmitRequest::default()
        },
    )
    .await?;

    // Each engine has its own in-process locks; only the tracker claim
    // stands between them.
    let (ra, rb) = tokio::join!(one.process_mr(&a.id), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        two.process_mr(&b.id).await
    });

    assert!(ra?.is_merged());
    assert_eq!(
        rb,
        Err(Error::TargetBusy {
            target: "main".to_string(),
            holder: a.id.clone()
        })
    );
    assert_eq!(one.get_mr(&b.id).await?.status, MrStatus::Open);
    assert!(merger.overlaps().is_empty());
    Ok(())
}
