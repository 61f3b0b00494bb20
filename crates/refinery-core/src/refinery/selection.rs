//! Selection policy: which MR each target processes next.
//!
//! Per target, the ready MR with the lowest priority number wins; ties go
//! to the earliest submission, then to the smaller identifier so the order
//! is total. A target with an MR already `in_progress` gets no candidate.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::{
    mr::types::{MergeRequest, MrStatus},
    tracker::Priority,
};

/// Sort key for processing order within one target.
#[must_use]
pub fn selection_key(mr: &MergeRequest) -> (Priority, DateTime<Utc>, &str) {
    (mr.priority, mr.created_at, mr.id.as_str())
}

/// Ready MRs in the order they would be processed, for every target.
#[must_use]
pub fn processing_order(mrs: &[MergeRequest]) -> Vec<&MergeRequest> {
    mrs.iter()
        .filter(|mr| mr.is_ready())
        .sorted_by(|a, b| selection_key(a).cmp(&selection_key(b)))
        .collect()
}

/// The next MR for `target`, or `None` if the target is busy or idle.
#[must_use]
pub fn next_for_target<'a>(mrs: &'a [MergeRequest], target: &str) -> Option<&'a MergeRequest> {
    let busy = mrs
        .iter()
        .any(|mr| mr.target == target && mr.status == MrStatus::InProgress);
    if busy {
        return None;
    }
    mrs.iter()
        .filter(|mr| mr.target == target && mr.is_ready())
        .min_by(|a, b| selection_key(a).cmp(&selection_key(b)))
}

/// One candidate per idle target, keyed by target name.
#[must_use]
pub fn plan(mrs: &[MergeRequest]) -> BTreeMap<&str, &MergeRequest> {
    let targets: BTreeSet<&str> = mrs.iter().map(|mr| mr.target.as_str()).collect();
    targets
        .into_iter()
        .filter_map(|target| next_for_target(mrs, target).map(|mr| (target, mr)))
        .collect()
}

/// Targets skipped this cycle because an MR is already `in_progress`.
#[must_use]
pub fn busy_targets(mrs: &[MergeRequest]) -> Vec<&str> {
    mrs.iter()
        .filter(|mr| mr.status == MrStatus::InProgress)
        .map(|mr| mr.target.as_str())
        .unique()
        .sorted()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn mr(id: &str, target: &str, priority: Priority, t: i64, status: MrStatus) -> MergeRequest {
        let created = Utc.timestamp_opt(t, 0).single().unwrap_or_default();
        MergeRequest {
            id: id.to_string(),
            branch: format!("polecat/Nux/{id}"),
            target: target.to_string(),
            source_issue: id.to_string(),
            worker: "Nux".to_string(),
            rig: "gastown".to_string(),
            priority,
            status,
            blocked_by: Vec::new(),
            error: None,
            rejection_reason: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn ready(id: &str, priority: Priority, t: i64) -> MergeRequest {
        mr(id, "main", priority, t, MrStatus::Open)
    }

    #[test]
    fn test_priority_then_fifo() {
        let mrs = vec![
            ready("A", Priority::P1, 10),
            ready("B", Priority::P0, 20),
            ready("C", Priority::P0, 5),
        ];
        let order: Vec<&str> = processing_order(&mrs).into_iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["C", "B", "A"]);
        assert_eq!(next_for_target(&mrs, "main").map(|m| m.id.as_str()), Some("C"));
    }

    #[test]
    fn test_busy_target_has_no_candidate() {
        let mrs = vec![
            ready("A", Priority::P0, 1),
            mr("B", "main", Priority::P4, 2, MrStatus::InProgress),
        ];
        assert_eq!(next_for_target(&mrs, "main"), None);
        assert_eq!(busy_targets(&mrs), vec!["main"]);
    }

    #[test]
    fn test_blocked_and_failed_handling() {
        let mut blocked = ready("A", Priority::P0, 1);
        blocked.blocked_by = vec!["X".to_string()];
        let mut failed = ready("B", Priority::P0, 2);
        failed.error = Some("conflict".to_string());
        let mrs = vec![blocked, failed, ready("C", Priority::P3, 3)];
        // Failed MRs wait for a retry.
        assert_eq!(next_for_target(&mrs, "main").map(|m| m.id.as_str()), Some("C"));
    }

    #[test]
    fn test_plan_one_per_idle_target() {
        let mrs = vec![
            ready("A", Priority::P2, 1),
            ready("B", Priority::P1, 2),
            mr("C", "integration/gt-epic", Priority::P2, 3, MrStatus::Open),
            mr("D", "integration/gt-busy", Priority::P2, 4, MrStatus::Open),
            mr("E", "integration/gt-busy", Priority::P2, 5, MrStatus::InProgress),
            mr("F", "integration/gt-done", Priority::P2, 6, MrStatus::Closed),
        ];
        let plan: Vec<(&str, &str)> = plan(&mrs)
            .into_iter()
            .map(|(target, mr)| (target, mr.id.as_str()))
            .collect();
        assert_eq!(plan, vec![("integration/gt-epic", "C"), ("main", "B")]);
    }

    fn priority_strategy() -> impl Strategy<Value = Priority> {
        (0u32..=4).prop_map(|n| Priority::from_u32(n).unwrap_or_default())
    }

    proptest! {
        #[test]
        fn prop_candidate_is_minimal(entries in prop::collection::vec((priority_strategy(), 0i64..1000), 1..20)) {
            let mrs: Vec<MergeRequest> = entries
                .iter()
                .enumerate()
                .map(|(i, (p, t))| ready(&format!("gt-{i:03}"), *p, *t))
                .collect();
            let chosen = next_for_target(&mrs, "main");
            prop_assert!(chosen.is_some());
            if let Some(chosen) = chosen {
                for other in &mrs {
                    prop_assert!(selection_key(chosen) <= selection_key(other));
                }
                let order = processing_order(&mrs);
                prop_assert_eq!(order.first().map(|m| m.id.as_str()), Some(chosen.id.as_str()));
            }
        }
    }
}
