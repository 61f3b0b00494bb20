//! SQLite-backed issue store using `SQLx`.
//!
//! One database file per rig, shared by every process working on it.
//! Status changes are single `UPDATE` statements guarded by their
//! preconditions, so two processes racing to claim the same issue (or two
//! issues holding the same exclusive label) cannot both succeed.

use std::{collections::HashMap, path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use tracing::debug;

use super::{
    IdGenerator, Issue, IssueFilter, IssueStatus, IssueTracker, IssueType, IssueUpdate, NewIssue,
    Priority, Transition, TransitionOutcome,
};
use crate::{Error, Result};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS issues (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    issue_type TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('open', 'in_progress', 'closed', 'rejected')),
    priority INTEGER NOT NULL CHECK(priority BETWEEN 0 AND 4),
    description TEXT NOT NULL DEFAULT '',
    assignee TEXT,
    notes TEXT,
    close_reason TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    closed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
CREATE INDEX IF NOT EXISTS idx_issues_created ON issues(created_at, id);

CREATE TABLE IF NOT EXISTS labels (
    issue_id TEXT NOT NULL REFERENCES issues(id),
    label TEXT NOT NULL,
    PRIMARY KEY (issue_id, label)
);

CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label);

CREATE TABLE IF NOT EXISTS dependencies (
    issue_id TEXT NOT NULL REFERENCES issues(id),
    depends_on_id TEXT NOT NULL REFERENCES issues(id),
    PRIMARY KEY (issue_id, depends_on_id)
);
";

const COLUMNS: &str = "id, title, issue_type, status, priority, description, assignee, notes, \
                       close_reason, created_at, updated_at, closed_at";

// Binds: ?1 status, ?2 now, ?3 touch notes, ?4 notes, ?5 close reason, ?6 id
const SET_FIELDS: &str = "status = COALESCE(?1, status), \
     closed_at = CASE WHEN ?1 IS NULL THEN closed_at \
                      WHEN ?1 IN ('closed', 'rejected') THEN ?2 \
                      ELSE NULL END, \
     notes = CASE WHEN ?3 THEN ?4 ELSE notes END, \
     close_reason = COALESCE(?5, close_reason), \
     updated_at = ?2";

const CREATE_ATTEMPTS: usize = 5;

/// Issue store persisted in a `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteTracker {
    pool: SqlitePool,
    ids: std::sync::Arc<IdGenerator>,
}

impl SqliteTracker {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tracker` if the file cannot be opened or the schema
    /// cannot be initialized.
    pub async fn open(path: &Path, prefix: &str) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::Tracker(format!("failed to open {}: {e}", path.display())))?;
        Self::with_pool(pool, prefix).await
    }

    /// Private in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tracker` if the schema cannot be initialized.
    pub async fn in_memory(prefix: &str) -> Result<Self> {
        // Each connection to `sqlite::memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::Tracker(format!("failed to open in-memory database: {e}")))?;
        Self::with_pool(pool, prefix).await
    }

    async fn with_pool(pool: SqlitePool, prefix: &str) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::Tracker(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            pool,
            ids: std::sync::Arc::new(IdGenerator::new(prefix)),
        })
    }

    async fn fetch_one(&self, id: &str) -> Result<Option<Issue>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM issues WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut issues = vec![parse_issue_row(&row)?];
        self.attach_relations(&mut issues).await?;
        Ok(issues.pop())
    }

    /// Fill `labels` and unresolved `blocked_by` for each issue.
    async fn attach_relations(&self, issues: &mut [Issue]) -> Result<()> {
        if issues.is_empty() {
            return Ok(());
        }

        let mut labels: HashMap<String, Vec<String>> = HashMap::new();
        let rows = sqlx::query("SELECT issue_id, label FROM labels ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let issue_id: String = row.try_get("issue_id")?;
            let label: String = row.try_get("label")?;
            labels.entry(issue_id).or_default().push(label);
        }

        let mut blockers: HashMap<String, Vec<String>> = HashMap::new();
        let rows = sqlx::query(
            "SELECT d.issue_id, d.depends_on_id FROM dependencies d \
             JOIN issues b ON b.id = d.depends_on_id \
             WHERE b.status != 'closed' ORDER BY d.rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let issue_id: String = row.try_get("issue_id")?;
            let depends_on: String = row.try_get("depends_on_id")?;
            blockers.entry(issue_id).or_default().push(depends_on);
        }

        for issue in issues.iter_mut() {
            issue.labels = labels.remove(&issue.id).unwrap_or_default();
            issue.blocked_by = blockers.remove(&issue.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn holder_of(&self, label: &str, status: IssueStatus, except: &str) -> Result<Option<String>> {
        let holder = sqlx::query(
            "SELECT o.id FROM issues o JOIN labels l ON l.issue_id = o.id \
             WHERE l.label = ? AND o.status = ? AND o.id != ? LIMIT 1",
        )
        .bind(label)
        .bind(status.to_string())
        .bind(except)
        .fetch_optional(&self.pool)
        .await?;
        holder
            .map(|row| row.try_get::<String, _>("id"))
            .transpose()
            .map_err(Error::from)
    }

    /// Issue, labels and dependencies in one transaction.
    async fn insert(
        &self,
        id: &str,
        new: &NewIssue,
        now: i64,
    ) -> std::result::Result<Inserted, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO issues (id, title, issue_type, status, priority, description, assignee, \
             created_at, updated_at) VALUES (?, ?, ?, 'open', ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&new.title)
        .bind(new.issue_type.to_string())
        .bind(i64::from(new.priority.to_u32()))
        .bind(&new.description)
        .bind(&new.assignee)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        // The insert takes the write lock before any read.
        for depends_on in &new.depends_on {
            let exists = sqlx::query("SELECT 1 FROM issues WHERE id = ?")
                .bind(depends_on)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                tx.rollback().await?;
                return Ok(Inserted::MissingDependency(depends_on.clone()));
            }
        }
        for label in &new.labels {
            sqlx::query("INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?, ?)")
                .bind(id)
                .bind(label)
                .execute(&mut *tx)
                .await?;
        }
        for depends_on in &new.depends_on {
            sqlx::query("INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id) VALUES (?, ?)")
                .bind(id)
                .bind(depends_on)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(Inserted::Stored)
    }
}

enum Inserted {
    Stored,
    MissingDependency(String),
}

#[async_trait::async_trait]
impl IssueTracker for SqliteTracker {
    async fn show(&self, id: &str) -> Result<Option<Issue>> {
        self.fetch_one(id).await
    }

    async fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM issues \
             WHERE (?1 IS NULL OR issue_type = ?1) \
               AND (?2 IS NULL OR status = ?2) \
               AND (?3 IS NULL OR EXISTS \
                    (SELECT 1 FROM labels l WHERE l.issue_id = issues.id AND l.label = ?3)) \
             ORDER BY created_at, id"
        ))
        .bind(filter.issue_type.as_ref().map(ToString::to_string))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.label.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut issues = rows
            .iter()
            .map(parse_issue_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_relations(&mut issues).await?;
        Ok(issues)
    }

    async fn ready(&self) -> Result<Vec<Issue>> {
        let mut open = self
            .list(&IssueFilter {
                status: Some(IssueStatus::Open),
                ..IssueFilter::default()
            })
            .await?;
        open.retain(|i| !i.is_blocked());
        open.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(open)
    }

    async fn create(&self, new: NewIssue) -> Result<Issue> {
        let now = Utc::now().timestamp_micros();
        for _ in 0..CREATE_ATTEMPTS {
            let id = self.ids.next_id();
            match self.insert(&id, &new, now).await {
                Ok(Inserted::MissingDependency(missing)) => return Err(Error::NotFound(missing)),
                Ok(Inserted::Stored) => {
                    debug!(issue_id = %id, issue_type = %new.issue_type, "Created issue");
                    return self
                        .fetch_one(&id)
                        .await?
                        .ok_or_else(|| Error::Tracker(format!("issue {id} vanished after insert")));
                }
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    debug!(issue_id = %id, "Identifier collision, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Tracker(format!(
            "could not allocate a unique issue id after {CREATE_ATTEMPTS} attempts"
        )))
    }

    async fn update(&self, id: &str, update: IssueUpdate) -> Result<Issue> {
        let result = bind_update(
            sqlx::query(&format!("UPDATE issues SET {SET_FIELDS} WHERE id = ?6")),
            &update,
            id,
        )
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        self.fetch_one(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn transition(&self, id: &str, transition: Transition) -> Result<TransitionOutcome> {
        let result = bind_update(
            sqlx::query(&format!(
                "UPDATE issues SET {SET_FIELDS} \
                 WHERE id = ?6 AND status = ?7 \
                   AND (?8 IS NULL OR ?1 IS NULL OR NOT EXISTS ( \
                        SELECT 1 FROM issues o JOIN labels l ON l.issue_id = o.id \
                        WHERE l.label = ?8 AND o.status = ?1 AND o.id != ?6))"
            )),
            &transition.update,
            id,
        )
        .bind(transition.from.to_string())
        .bind(transition.exclusive_label.as_deref())
        .execute(&self.pool)
        .await?;

        let current = self
            .fetch_one(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if result.rows_affected() > 0 {
            return Ok(TransitionOutcome::Applied(current));
        }
        if current.status != transition.from {
            return Ok(TransitionOutcome::StatusMismatch(current.status));
        }

        let holder = match (&transition.exclusive_label, transition.update.status) {
            (Some(label), Some(to)) => self.holder_of(label, to, id).await?,
            _ => None,
        };
        // A holder that finished between the two statements leaves no
        // one to blame; report the current status and let the caller retry.
        Ok(holder.map_or(
            TransitionOutcome::StatusMismatch(current.status),
            |holder| TransitionOutcome::Contended { holder },
        ))
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_update<'q>(query: SqliteQuery<'q>, update: &IssueUpdate, id: &str) -> SqliteQuery<'q> {
    query
        .bind(update.status.map(|s| s.to_string()))
        .bind(Utc::now().timestamp_micros())
        .bind(update.notes.is_some())
        .bind(update.notes.clone().flatten())
        .bind(update.close_reason.clone())
        .bind(id.to_string())
}

fn parse_issue_row(row: &SqliteRow) -> Result<Issue> {
    let issue_type: String = row.try_get("issue_type")?;
    let status: String = row.try_get("status")?;
    let priority: i64 = row.try_get("priority")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    let closed_at: Option<i64> = row.try_get("closed_at")?;

    Ok(Issue {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        issue_type: IssueType::from_str(&issue_type)
            .map_err(|e| Error::Tracker(format!("invalid issue type '{issue_type}': {e}")))?,
        status: IssueStatus::from_str(&status)
            .map_err(|e| Error::Tracker(format!("invalid issue status '{status}': {e}")))?,
        priority: u32::try_from(priority)
            .ok()
            .and_then(Priority::from_u32)
            .ok_or_else(|| Error::Tracker(format!("invalid priority {priority}")))?,
        description: row.try_get("description")?,
        assignee: row.try_get("assignee")?,
        labels: Vec::new(),
        notes: row.try_get("notes")?,
        close_reason: row.try_get("close_reason")?,
        blocked_by: Vec::new(),
        created_at: timestamp(created_at)?,
        updated_at: timestamp(updated_at)?,
        closed_at: closed_at.map(timestamp).transpose()?,
    })
}

fn timestamp(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Tracker(format!("invalid timestamp {micros}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tracker() -> Result<SqliteTracker> {
        SqliteTracker::in_memory("gt").await
    }

    fn task(title: &str) -> NewIssue {
        NewIssue::new(title, IssueType::Task, Priority::P2)
    }

    #[tokio::test]
    async fn test_create_and_show() -> Result<()> {
        let tracker = tracker().await?;
        let created = tracker
            .create(
                NewIssue::new("Merge: gt-42", IssueType::Task, Priority::P1)
                    .with_description("type: merge-request\nbranch: x")
                    .with_label("refinery-target:main"),
            )
            .await?;
        assert!(created.id.starts_with("gt-"));
        assert_eq!(created.status, IssueStatus::Open);
        assert_eq!(created.labels, vec!["refinery-target:main".to_string()]);

        let shown = tracker.show(&created.id).await?;
        assert_eq!(shown, Some(created));
        Ok(())
    }

    #[tokio::test]
    async fn test_show_missing_is_none() -> Result<()> {
        let tracker = tracker().await?;
        assert_eq!(tracker.show("gt-nope").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_sets_and_clears_notes() -> Result<()> {
        let tracker = tracker().await?;
        let issue = tracker.create(task("a")).await?;

        let updated = tracker
            .update(&issue.id, IssueUpdate::default().with_notes("conflict"))
            .await?;
        assert_eq!(updated.notes.as_deref(), Some("conflict"));
        assert_eq!(updated.status, IssueStatus::Open);

        let cleared = tracker
            .update(&issue.id, IssueUpdate::default().clear_notes())
            .await?;
        assert_eq!(cleared.notes, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_close_records_reason_and_time() -> Result<()> {
        let tracker = tracker().await?;
        let issue = tracker.create(task("a")).await?;
        let closed = tracker.close(&issue.id, "merged").await?;
        assert_eq!(closed.status, IssueStatus::Closed);
        assert_eq!(closed.close_reason.as_deref(), Some("merged"));
        assert!(closed.closed_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() -> Result<()> {
        let tracker = tracker().await?;
        let result = tracker.close("gt-nope", "x").await;
        assert_eq!(result, Err(Error::NotFound("gt-nope".to_string())));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_compose() -> Result<()> {
        let tracker = tracker().await?;
        let a = tracker.create(task("a").with_label("x")).await?;
        let _b = tracker.create(task("b")).await?;
        let _msg = tracker
            .create(NewIssue::new("hi", IssueType::Message, Priority::P2).with_label("x"))
            .await?;

        let filter = IssueFilter {
            issue_type: Some(IssueType::Task),
            status: Some(IssueStatus::Open),
            label: Some("x".to_string()),
        };
        let ids: Vec<String> = tracker.list(&filter).await?.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a.id]);
        Ok(())
    }

    #[tokio::test]
    async fn test_dependencies_resolve_at_read_time() -> Result<()> {
        let tracker = tracker().await?;
        let blocker = tracker.create(task("first")).await?;
        let dependent = tracker
            .create(task("second").with_dependency(&blocker.id))
            .await?;
        assert_eq!(dependent.blocked_by, vec![blocker.id.clone()]);

        let shown = tracker.show(&dependent.id).await?;
        assert_eq!(shown.map(|i| i.blocked_by), Some(vec![blocker.id.clone()]));
        let ready: Vec<String> = tracker.ready().await?.into_iter().map(|i| i.id).collect();
        assert_eq!(ready, vec![blocker.id.clone()]);

        tracker.close(&blocker.id, "done").await?;
        let ready: Vec<String> = tracker.ready().await?.into_iter().map(|i| i.id).collect();
        assert_eq!(ready, vec![dependent.id]);
        Ok(())
    }

    #[tokio::test]
    async fn test_dependency_on_missing_issue_stores_nothing() -> Result<()> {
        let tracker = tracker().await?;
        let issue = tracker.create(task("a")).await?;
        let result = tracker
            .create(
                task("b")
                    .with_label("refinery-target:main")
                    .with_dependency(&issue.id)
                    .with_dependency("gt-ghost"),
            )
            .await;
        assert_eq!(result, Err(Error::NotFound("gt-ghost".to_string())));
        let ids: Vec<String> = tracker
            .list(&IssueFilter::default())
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![issue.id]);
        Ok(())
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() -> Result<()> {
        let tracker = tracker().await?;
        let issue = tracker.create(task("a")).await?;
        let claim = Transition::new(
            IssueStatus::Open,
            IssueUpdate::status(IssueStatus::InProgress),
        );

        let first = tracker.transition(&issue.id, claim.clone()).await?;
        assert!(matches!(first, TransitionOutcome::Applied(ref i) if i.status == IssueStatus::InProgress));

        let second = tracker.transition(&issue.id, claim).await?;
        assert_eq!(
            second,
            TransitionOutcome::StatusMismatch(IssueStatus::InProgress)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_transition_respects_exclusive_label() -> Result<()> {
        let tracker = tracker().await?;
        let a = tracker.create(task("a").with_label("target:main")).await?;
        let b = tracker.create(task("b").with_label("target:main")).await?;
        let c = tracker.create(task("c").with_label("target:dev")).await?;
        let claim = |label: &str| {
            Transition::new(
                IssueStatus::Open,
                IssueUpdate::status(IssueStatus::InProgress),
            )
            .exclusive_on(label)
        };

        assert!(matches!(
            tracker.transition(&a.id, claim("target:main")).await?,
            TransitionOutcome::Applied(_)
        ));
        assert_eq!(
            tracker.transition(&b.id, claim("target:main")).await?,
            TransitionOutcome::Contended { holder: a.id.clone() }
        );
        assert!(matches!(
            tracker.transition(&c.id, claim("target:dev")).await?,
            TransitionOutcome::Applied(_)
        ));

        tracker.close(&a.id, "merged").await?;
        assert!(matches!(
            tracker.transition(&b.id, claim("target:main")).await?,
            TransitionOutcome::Applied(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_transition_missing_is_not_found() -> Result<()> {
        let tracker = tracker().await?;
        let result = tracker
            .transition(
                "gt-nope",
                Transition::new(IssueStatus::Open, IssueUpdate::status(IssueStatus::Closed)),
            )
            .await;
        assert_eq!(result, Err(Error::NotFound("gt-nope".to_string())));
        Ok(())
    }

    #[tokio::test]
    async fn test_open_file_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".beads").join("refinery.db");
        let issue_id = {
            let tracker = SqliteTracker::open(&path, "gt").await?;
            tracker.create(task("persisted")).await?.id
        };
        let reopened = SqliteTracker::open(&path, "gt").await?;
        assert!(reopened.show(&issue_id).await?.is_some());
        Ok(())
    }
}
