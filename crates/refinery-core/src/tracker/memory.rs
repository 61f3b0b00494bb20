//! In-process issue store.
//!
//! All state sits behind one async mutex, so every trait method is a single
//! atomic step. Identifiers are sequential (`gt-1`, `gt-2`, ...) and
//! creation timestamps strictly increase, which keeps FIFO order stable.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::{
    Issue, IssueFilter, IssueStatus, IssueTracker, IssueUpdate, NewIssue, Transition,
    TransitionOutcome,
};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct State {
    issues: Vec<Issue>,
    dependencies: Vec<(String, String)>,
    next_seq: u64,
    last_created: Option<DateTime<Utc>>,
}

impl State {
    fn position(&self, id: &str) -> Option<usize> {
        self.issues.iter().position(|i| i.id == id)
    }

    fn status_of(&self, id: &str) -> Option<IssueStatus> {
        self.issues.iter().find(|i| i.id == id).map(|i| i.status)
    }

    /// Copy of the record with `blocked_by` resolved against current state.
    fn resolved(&self, issue: &Issue) -> Issue {
        let blocked_by = self
            .dependencies
            .iter()
            .filter(|(dependent, _)| *dependent == issue.id)
            .filter(|(_, blocker)| self.status_of(blocker) != Some(IssueStatus::Closed))
            .map(|(_, blocker)| blocker.clone())
            .collect();
        Issue {
            blocked_by,
            ..issue.clone()
        }
    }

    fn resolved_at(&self, index: usize) -> Option<Issue> {
        self.issues.get(index).map(|i| self.resolved(i))
    }

    fn creation_time(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(stamp);
        stamp
    }
}

/// Issue store held entirely in memory.
#[derive(Debug)]
pub struct MemoryTracker {
    prefix: String,
    state: Mutex<State>,
}

impl MemoryTracker {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new("gt")
    }
}

#[async_trait::async_trait]
impl IssueTracker for MemoryTracker {
    async fn show(&self, id: &str) -> Result<Option<Issue>> {
        let state = self.state.lock().await;
        Ok(state.position(id).and_then(|idx| state.resolved_at(idx)))
    }

    async fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let state = self.state.lock().await;
        Ok(state
            .issues
            .iter()
            .filter(|i| filter.matches(i))
            .map(|i| state.resolved(i))
            .collect())
    }

    async fn ready(&self) -> Result<Vec<Issue>> {
        let state = self.state.lock().await;
        let mut ready: Vec<Issue> = state
            .issues
            .iter()
            .filter(|i| i.status == IssueStatus::Open)
            .map(|i| state.resolved(i))
            .filter(|i| !i.is_blocked())
            .collect();
        ready.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(ready)
    }

    async fn create(&self, new: NewIssue) -> Result<Issue> {
        let mut state = self.state.lock().await;
        if let Some(missing) = new.depends_on.iter().find(|d| state.position(d).is_none()) {
            return Err(Error::NotFound(missing.clone()));
        }
        state.next_seq += 1;
        let id = format!("{}-{}", self.prefix, state.next_seq);
        let now = state.creation_time();
        let issue = Issue {
            id,
            title: new.title,
            issue_type: new.issue_type,
            status: IssueStatus::Open,
            priority: new.priority,
            description: new.description,
            assignee: new.assignee,
            labels: new.labels,
            notes: None,
            close_reason: None,
            blocked_by: Vec::new(),
            created_at: now,
            updated_at: now,
            closed_at: None,
        };
        for depends_on in new.depends_on {
            let edge = (issue.id.clone(), depends_on);
            if !state.dependencies.contains(&edge) {
                state.dependencies.push(edge);
            }
        }
        let created = state.resolved(&issue);
        state.issues.push(issue);
        Ok(created)
    }

    async fn update(&self, id: &str, update: IssueUpdate) -> Result<Issue> {
        let mut state = self.state.lock().await;
        let idx = state
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if let Some(issue) = state.issues.get_mut(idx) {
            update.apply(issue, Utc::now());
        }
        state
            .resolved_at(idx)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn transition(&self, id: &str, transition: Transition) -> Result<TransitionOutcome> {
        let mut state = self.state.lock().await;
        let idx = state
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let current = state
            .issues
            .get(idx)
            .map(|i| i.status)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if current != transition.from {
            return Ok(TransitionOutcome::StatusMismatch(current));
        }

        if let (Some(label), Some(to)) = (&transition.exclusive_label, transition.update.status) {
            let holder = state
                .issues
                .iter()
                .find(|i| i.id != id && i.status == to && i.has_label(label));
            if let Some(holder) = holder {
                return Ok(TransitionOutcome::Contended {
                    holder: holder.id.clone(),
                });
            }
        }

        if let Some(issue) = state.issues.get_mut(idx) {
            transition.update.apply(issue, Utc::now());
        }
        state
            .resolved_at(idx)
            .map(TransitionOutcome::Applied)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{IssueType, Priority};

    fn task(title: &str, priority: Priority) -> NewIssue {
        NewIssue::new(title, IssueType::Task, priority)
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() -> Result<()> {
        let tracker = MemoryTracker::new("gt");
        let a = tracker.create(task("a", Priority::P2)).await?;
        let b = tracker.create(task("b", Priority::P2)).await?;
        assert_eq!(a.id, "gt-1");
        assert_eq!(b.id, "gt-2");
        assert!(a.created_at < b.created_at);
        assert_eq!(a.status, IssueStatus::Open);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let tracker = MemoryTracker::default();
        let result = tracker
            .update("gt-404", IssueUpdate::status(IssueStatus::Closed))
            .await;
        assert_eq!(result, Err(Error::NotFound("gt-404".to_string())));
    }

    #[tokio::test]
    async fn test_blocked_by_clears_when_blocker_closes() -> Result<()> {
        let tracker = MemoryTracker::default();
        let blocker = tracker.create(task("first", Priority::P2)).await?;
        let dependent = tracker
            .create(task("second", Priority::P2).with_dependency(&blocker.id))
            .await?;
        assert_eq!(dependent.blocked_by, vec![blocker.id.clone()]);

        let shown = tracker.show(&dependent.id).await?;
        assert_eq!(shown.map(|i| i.blocked_by), Some(vec![blocker.id.clone()]));
        assert_eq!(tracker.ready().await?.len(), 1);

        tracker.close(&blocker.id, "done").await?;
        let shown = tracker.show(&dependent.id).await?;
        assert!(shown.is_some_and(|i| i.blocked_by.is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_with_missing_dependency_stores_nothing() -> Result<()> {
        let tracker = MemoryTracker::default();
        let blocker = tracker.create(task("first", Priority::P2)).await?;
        let result = tracker
            .create(
                task("second", Priority::P2)
                    .with_dependency(&blocker.id)
                    .with_dependency("gt-404"),
            )
            .await;
        assert_eq!(result, Err(Error::NotFound("gt-404".to_string())));
        assert_eq!(tracker.list(&IssueFilter::default()).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_ready_orders_by_priority_then_age() -> Result<()> {
        let tracker = MemoryTracker::default();
        let low = tracker.create(task("low", Priority::P3)).await?;
        let high = tracker.create(task("high", Priority::P0)).await?;
        let ids: Vec<String> = tracker.ready().await?.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![high.id, low.id]);
        Ok(())
    }

    #[tokio::test]
    async fn test_transition_reports_status_mismatch() -> Result<()> {
        let tracker = MemoryTracker::default();
        let issue = tracker.create(task("a", Priority::P2)).await?;
        let outcome = tracker
            .transition(
                &issue.id,
                Transition::new(
                    IssueStatus::InProgress,
                    IssueUpdate::status(IssueStatus::Closed),
                ),
            )
            .await?;
        assert_eq!(outcome, TransitionOutcome::StatusMismatch(IssueStatus::Open));
        Ok(())
    }

    #[tokio::test]
    async fn test_exclusive_label_admits_one_holder() -> Result<()> {
        let tracker = MemoryTracker::default();
        let a = tracker
            .create(task("a", Priority::P2).with_label("target:main"))
            .await?;
        let b = tracker
            .create(task("b", Priority::P2).with_label("target:main"))
            .await?;
        let claim = || {
            Transition::new(
                IssueStatus::Open,
                IssueUpdate::status(IssueStatus::InProgress),
            )
            .exclusive_on("target:main")
        };

        let first = tracker.transition(&a.id, claim()).await?;
        assert!(matches!(first, TransitionOutcome::Applied(_)));
        let second = tracker.transition(&b.id, claim()).await?;
        assert_eq!(second, TransitionOutcome::Contended { holder: a.id });
        Ok(())
    }
}
