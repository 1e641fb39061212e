//! Repositories for workspace content: pages, tasks, projects, and goals.
//!
//! Status, priority, and bucket columns are stored as lowercase strings
//! guarded by CHECK constraints; callers normalize before writing.

use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Timestamp;

use crate::db::{json_at, opt_uuid_at, sql_err, uuid_at, Database};

// =============================================================================
// Pages
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub space_id: Uuid,
    pub title: String,
    pub content: String,
    pub parent_page_id: Option<Uuid>,
    /// Stable key for generated pages (daily focus, reviews, recaps).
    pub generated_key: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Page {
    pub fn new(workspace_id: Uuid, space_id: Uuid, title: &str) -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            space_id,
            title: title.to_string(),
            content: String::new(),
            parent_page_id: None,
            generated_key: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

const PAGE_COLUMNS: &str = "id, workspace_id, space_id, title, content, parent_page_id, \
     generated_key, created_by, created_at, updated_at, deleted_at";

pub struct PageRepository {
    db: Arc<Database>,
}

impl PageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a page. When the page carries a generated key that already
    /// exists in its space, the existing page is returned with `false`.
    pub fn insert(&self, page: &Page) -> Result<(Page, bool), FolioError> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO pages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT DO NOTHING",
                    PAGE_COLUMNS
                ),
                rusqlite::params![
                    page.id.to_string(),
                    page.workspace_id.to_string(),
                    page.space_id.to_string(),
                    page.title,
                    page.content,
                    page.parent_page_id.map(|id| id.to_string()),
                    page.generated_key,
                    page.created_by.map(|id| id.to_string()),
                    page.created_at.0,
                    page.updated_at.0,
                    page.deleted_at.map(|t| t.0),
                ],
            )
            .map_err(sql_err("Failed to insert page"))
        })?;

        if changed == 1 {
            return Ok((page.clone(), true));
        }

        let key = page.generated_key.as_deref().ok_or_else(|| {
            FolioError::Storage(format!("Page {} was not inserted", page.id))
        })?;
        let existing = self
            .find_by_generated_key(page.space_id, key)?
            .ok_or_else(|| FolioError::Storage(format!("Page key {} conflicted but is missing", key)))?;
        Ok((existing, false))
    }

    /// Live (not trashed) page by id.
    pub fn find(&self, id: Uuid) -> Result<Option<Page>, FolioError> {
        self.query_one(
            &format!("SELECT {} FROM pages WHERE id = ?1 AND deleted_at IS NULL", PAGE_COLUMNS),
            rusqlite::params![id.to_string()],
        )
    }

    /// Live page in a space with exactly this title.
    pub fn find_by_title(&self, space_id: Uuid, title: &str) -> Result<Option<Page>, FolioError> {
        self.query_one(
            &format!(
                "SELECT {} FROM pages WHERE space_id = ?1 AND title = ?2 AND deleted_at IS NULL
                 ORDER BY created_at LIMIT 1",
                PAGE_COLUMNS
            ),
            rusqlite::params![space_id.to_string(), title],
        )
    }

    pub fn find_by_generated_key(
        &self,
        space_id: Uuid,
        key: &str,
    ) -> Result<Option<Page>, FolioError> {
        self.query_one(
            &format!(
                "SELECT {} FROM pages WHERE space_id = ?1 AND generated_key = ?2 AND deleted_at IS NULL",
                PAGE_COLUMNS
            ),
            rusqlite::params![space_id.to_string(), key],
        )
    }

    pub fn update(
        &self,
        id: Uuid,
        title: Option<&str>,
        content: Option<&str>,
    ) -> Result<bool, FolioError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE pages SET title = COALESCE(?2, title), content = COALESCE(?3, content),
                     updated_at = ?4 WHERE id = ?1 AND deleted_at IS NULL",
                    rusqlite::params![id.to_string(), title, content, Timestamp::now().0],
                )
                .map_err(sql_err("Failed to update page"))?;
            Ok(changed == 1)
        })
    }

    /// Move a page to the trash.
    pub fn soft_delete(&self, id: Uuid) -> Result<bool, FolioError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE pages SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                    rusqlite::params![id.to_string(), Timestamp::now().0],
                )
                .map_err(sql_err("Failed to trash page"))?;
            Ok(changed == 1)
        })
    }

    /// Permanently remove pages trashed before `cutoff`.
    pub fn purge_trashed(&self, cutoff: Timestamp) -> Result<usize, FolioError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pages WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
                [cutoff.0],
            )
            .map_err(sql_err("Failed to purge trashed pages"))
        })
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Page>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(sql, params, row_to_page)
                .optional()
                .map_err(sql_err("Failed to load page"))
        })
    }
}

fn row_to_page(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        space_id: uuid_at(row, 2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        parent_page_id: opt_uuid_at(row, 5)?,
        generated_key: row.get(6)?,
        created_by: opt_uuid_at(row, 7)?,
        created_at: Timestamp(row.get(8)?),
        updated_at: Timestamp(row.get(9)?),
        deleted_at: row.get::<_, Option<i64>>(10)?.map(Timestamp),
    })
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub space_id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub bucket: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub created_by: Option<Uuid>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Task {
    pub fn new(workspace_id: Uuid, space_id: Uuid, title: &str) -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            space_id,
            project_id: None,
            title: title.to_string(),
            description: String::new(),
            status: "todo".to_string(),
            priority: "medium".to_string(),
            bucket: None,
            due_date: None,
            tags: Vec::new(),
            created_by: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the task still needs work.
    pub fn is_open(&self) -> bool {
        !matches!(self.status.as_str(), "done" | "cancelled")
    }
}

const TASK_COLUMNS: &str = "id, workspace_id, space_id, project_id, title, description, status, \
     priority, bucket, due_date, tags, created_by, created_at, updated_at, completed_at";

pub struct TaskRepository {
    db: Arc<Database>,
}

impl TaskRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, task: &Task) -> Result<(), FolioError> {
        let tags = serde_json::to_string(&task.tags)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    TASK_COLUMNS
                ),
                rusqlite::params![
                    task.id.to_string(),
                    task.workspace_id.to_string(),
                    task.space_id.to_string(),
                    task.project_id.map(|id| id.to_string()),
                    task.title,
                    task.description,
                    task.status,
                    task.priority,
                    task.bucket,
                    task.due_date.map(|d| d.to_string()),
                    tags,
                    task.created_by.map(|id| id.to_string()),
                    task.created_at.0,
                    task.updated_at.0,
                    task.completed_at.map(|t| t.0),
                ],
            )
            .map_err(sql_err("Failed to insert task"))?;
            Ok(())
        })
    }

    /// Overwrite the mutable columns of an existing task.
    ///
    /// Sets `completed_at` when the task moves to `done`.
    pub fn update(&self, task: &Task) -> Result<bool, FolioError> {
        let tags = serde_json::to_string(&task.tags)?;
        let now = Timestamp::now().0;
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET project_id = ?2, title = ?3, description = ?4, status = ?5,
                     priority = ?6, bucket = ?7, due_date = ?8, tags = ?9, updated_at = ?10,
                     completed_at = CASE WHEN ?5 = 'done' THEN COALESCE(completed_at, ?10) ELSE NULL END
                     WHERE id = ?1",
                    rusqlite::params![
                        task.id.to_string(),
                        task.project_id.map(|id| id.to_string()),
                        task.title,
                        task.description,
                        task.status,
                        task.priority,
                        task.bucket,
                        task.due_date.map(|d| d.to_string()),
                        tags,
                        now,
                    ],
                )
                .map_err(sql_err("Failed to update task"))?;
            Ok(changed == 1)
        })
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Task>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                [id.to_string()],
                row_to_task,
            )
            .optional()
            .map_err(sql_err("Failed to load task"))
        })
    }

    pub fn delete(&self, id: Uuid) -> Result<bool, FolioError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute("DELETE FROM tasks WHERE id = ?1", [id.to_string()])
                .map_err(sql_err("Failed to delete task"))?;
            Ok(changed == 1)
        })
    }

    pub fn list_for_space(&self, space_id: Uuid) -> Result<Vec<Task>, FolioError> {
        self.query_many(
            &format!(
                "SELECT {} FROM tasks WHERE space_id = ?1 ORDER BY created_at",
                TASK_COLUMNS
            ),
            rusqlite::params![space_id.to_string()],
        )
    }

    /// Open tasks carrying `tag` that have not been touched since `updated_before`.
    pub fn list_stale_tagged(
        &self,
        workspace_id: Uuid,
        tag: &str,
        updated_before: Timestamp,
    ) -> Result<Vec<Task>, FolioError> {
        self.query_many(
            &format!(
                "SELECT {} FROM tasks
                 WHERE workspace_id = ?1 AND updated_at < ?3
                   AND status NOT IN ('done', 'cancelled')
                   AND EXISTS (SELECT 1 FROM json_each(tasks.tags) WHERE value = ?2)
                 ORDER BY updated_at",
                TASK_COLUMNS
            ),
            rusqlite::params![workspace_id.to_string(), tag, updated_before.0],
        )
    }

    /// Open inbox task counts per space.
    pub fn inbox_counts(&self, workspace_id: Uuid) -> Result<Vec<(Uuid, usize)>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT space_id, COUNT(*) FROM tasks
                     WHERE workspace_id = ?1 AND bucket = 'inbox'
                       AND status NOT IN ('done', 'cancelled')
                     GROUP BY space_id",
                )
                .map_err(sql_err("Failed to prepare inbox counts"))?;
            let rows = stmt
                .query_map([workspace_id.to_string()], |row| {
                    Ok((uuid_at(row, 0)?, row.get::<_, i64>(1)? as usize))
                })
                .map_err(sql_err("Failed to count inbox tasks"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read inbox count"))
        })
    }

    fn query_many(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Task>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(sql_err("Failed to prepare task query"))?;
            let rows = stmt
                .query_map(params, row_to_task)
                .map_err(sql_err("Failed to query tasks"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read task row"))
        })
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let due: Option<String> = row.get(9)?;
    Ok(Task {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        space_id: uuid_at(row, 2)?,
        project_id: opt_uuid_at(row, 3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        priority: row.get(7)?,
        bucket: row.get(8)?,
        due_date: due.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        tags: json_at(row, 10)?,
        created_by: opt_uuid_at(row, 11)?,
        created_at: Timestamp(row.get(12)?),
        updated_at: Timestamp(row.get(13)?),
        completed_at: row.get::<_, Option<i64>>(14)?.map(Timestamp),
    })
}

// =============================================================================
// Projects
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub space_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

pub struct ProjectRepository {
    db: Arc<Database>,
}

impl ProjectRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, project: &Project) -> Result<(), FolioError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, workspace_id, space_id, name, description, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    project.id.to_string(),
                    project.workspace_id.to_string(),
                    project.space_id.to_string(),
                    project.name,
                    project.description,
                    project.status,
                    project.created_at.0,
                    project.updated_at.0,
                ],
            )
            .map_err(sql_err("Failed to insert project"))?;
            Ok(())
        })
    }

    pub fn find(&self, id: Uuid) -> Result<Option<Project>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, workspace_id, space_id, name, description, status, created_at, updated_at
                 FROM projects WHERE id = ?1",
                [id.to_string()],
                row_to_project,
            )
            .optional()
            .map_err(sql_err("Failed to load project"))
        })
    }

    pub fn update(
        &self,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
        status: Option<&str>,
    ) -> Result<bool, FolioError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE projects SET name = COALESCE(?2, name),
                     description = COALESCE(?3, description), status = COALESCE(?4, status),
                     updated_at = ?5 WHERE id = ?1",
                    rusqlite::params![id.to_string(), name, description, status, Timestamp::now().0],
                )
                .map_err(sql_err("Failed to update project"))?;
            Ok(changed == 1)
        })
    }

    pub fn list_active(&self, space_id: Uuid) -> Result<Vec<Project>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, workspace_id, space_id, name, description, status, created_at, updated_at
                     FROM projects WHERE space_id = ?1 AND status = 'active' ORDER BY created_at",
                )
                .map_err(sql_err("Failed to prepare project list"))?;
            let rows = stmt
                .query_map([space_id.to_string()], row_to_project)
                .map_err(sql_err("Failed to list projects"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read project row"))
        })
    }
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        space_id: uuid_at(row, 2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        created_at: Timestamp(row.get(6)?),
        updated_at: Timestamp(row.get(7)?),
    })
}

// =============================================================================
// Goals
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// `None` for workspace-wide goals.
    pub space_id: Option<Uuid>,
    pub title: String,
    pub horizon: String,
    pub keywords: Vec<String>,
    pub status: String,
    pub created_at: Timestamp,
}

pub struct GoalRepository {
    db: Arc<Database>,
}

impl GoalRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, goal: &Goal) -> Result<(), FolioError> {
        let keywords = serde_json::to_string(&goal.keywords)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO goals (id, workspace_id, space_id, title, horizon, keywords, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    goal.id.to_string(),
                    goal.workspace_id.to_string(),
                    goal.space_id.map(|id| id.to_string()),
                    goal.title,
                    goal.horizon,
                    keywords,
                    goal.status,
                    goal.created_at.0,
                ],
            )
            .map_err(sql_err("Failed to insert goal"))?;
            Ok(())
        })
    }

    /// Active goals for a space, including workspace-wide ones.
    pub fn list_active(
        &self,
        workspace_id: Uuid,
        space_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Goal>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, workspace_id, space_id, title, horizon, keywords, status, created_at
                     FROM goals
                     WHERE workspace_id = ?1 AND status = 'active'
                       AND (space_id IS NULL OR space_id = ?2)
                     ORDER BY created_at DESC LIMIT ?3",
                )
                .map_err(sql_err("Failed to prepare goal list"))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![workspace_id.to_string(), space_id.to_string(), limit as i64],
                    |row| {
                        Ok(Goal {
                            id: uuid_at(row, 0)?,
                            workspace_id: uuid_at(row, 1)?,
                            space_id: opt_uuid_at(row, 2)?,
                            title: row.get(3)?,
                            horizon: row.get(4)?,
                            keywords: json_at(row, 5)?,
                            status: row.get(6)?,
                            created_at: Timestamp(row.get(7)?),
                        })
                    },
                )
                .map_err(sql_err("Failed to list goals"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read goal row"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_generated_page_is_unique_per_space() {
        let repo = PageRepository::new(make_db());
        let (ws, space) = (Uuid::new_v4(), Uuid::new_v4());

        let mut first = Page::new(ws, space, "Daily Focus 2026-10-18");
        first.generated_key = Some("daily-focus:2026-10-18".into());
        let (stored, created) = repo.insert(&first).unwrap();
        assert!(created);
        assert_eq!(stored.id, first.id);

        let mut second = Page::new(ws, space, "Daily Focus 2026-10-18");
        second.generated_key = first.generated_key.clone();
        let (existing, created) = repo.insert(&second).unwrap();
        assert!(!created);
        assert_eq!(existing.id, first.id);

        // Same key in another space is fine.
        let mut other = Page::new(ws, Uuid::new_v4(), "Daily Focus 2026-10-18");
        other.generated_key = first.generated_key.clone();
        assert!(repo.insert(&other).unwrap().1);
    }

    #[test]
    fn test_trashed_page_releases_generated_key() {
        let repo = PageRepository::new(make_db());
        let (ws, space) = (Uuid::new_v4(), Uuid::new_v4());
        let mut page = Page::new(ws, space, "Weekly Review 2026-W42");
        page.generated_key = Some("weekly-review:2026-W42".into());
        repo.insert(&page).unwrap();

        assert!(repo.soft_delete(page.id).unwrap());
        assert!(repo.find(page.id).unwrap().is_none());
        assert!(repo.find_by_title(space, "Weekly Review 2026-W42").unwrap().is_none());

        let mut again = Page::new(ws, space, "Weekly Review 2026-W42");
        again.generated_key = page.generated_key.clone();
        assert!(repo.insert(&again).unwrap().1);
    }

    #[test]
    fn test_purge_trashed_respects_cutoff() {
        let repo = PageRepository::new(make_db());
        let (ws, space) = (Uuid::new_v4(), Uuid::new_v4());
        let mut old = Page::new(ws, space, "Old");
        old.deleted_at = Some(Timestamp::now().minus_days(40));
        let mut recent = Page::new(ws, space, "Recent");
        recent.deleted_at = Some(Timestamp::now().minus_days(2));
        let live = Page::new(ws, space, "Live");
        for page in [&old, &recent, &live] {
            repo.insert(page).unwrap();
        }

        let purged = repo.purge_trashed(Timestamp::now().minus_days(30)).unwrap();
        assert_eq!(purged, 1);
        assert!(repo.find(live.id).unwrap().is_some());
    }

    #[test]
    fn test_task_update_sets_completed_at() {
        let repo = TaskRepository::new(make_db());
        let mut task = Task::new(Uuid::new_v4(), Uuid::new_v4(), "Write report");
        task.tags = vec!["open-question".into()];
        repo.insert(&task).unwrap();

        task.status = "done".into();
        assert!(repo.update(&task).unwrap());
        let loaded = repo.find(task.id).unwrap().unwrap();
        assert!(loaded.completed_at.is_some());
        assert!(!loaded.is_open());
        assert_eq!(loaded.tags, vec!["open-question".to_string()]);

        assert!(repo.delete(task.id).unwrap());
        assert!(!repo.delete(task.id).unwrap());
    }

    #[test]
    fn test_stale_tagged_and_inbox_counts() {
        let repo = TaskRepository::new(make_db());
        let ws = Uuid::new_v4();
        let space = Uuid::new_v4();

        let mut stale = Task::new(ws, space, "Why is churn up?");
        stale.tags = vec!["open-question".into()];
        stale.bucket = Some("inbox".into());
        stale.updated_at = Timestamp::now().minus_days(30);
        let mut fresh = Task::new(ws, space, "Fresh question");
        fresh.tags = vec!["open-question".into()];
        fresh.bucket = Some("inbox".into());
        repo.insert(&stale).unwrap();
        repo.insert(&fresh).unwrap();

        let found = repo
            .list_stale_tagged(ws, "open-question", Timestamp::now().minus_days(14))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);

        assert_eq!(repo.inbox_counts(ws).unwrap(), vec![(space, 2)]);
    }

    #[test]
    fn test_goals_include_workspace_wide() {
        let repo = GoalRepository::new(make_db());
        let ws = Uuid::new_v4();
        let space = Uuid::new_v4();
        for (space_id, title) in [(None, "Company"), (Some(space), "Team"), (Some(Uuid::new_v4()), "Other")] {
            repo.insert(&Goal {
                id: Uuid::new_v4(),
                workspace_id: ws,
                space_id,
                title: title.into(),
                horizon: "mid".into(),
                keywords: vec![],
                status: "active".into(),
                created_at: Timestamp::now(),
            })
            .unwrap();
        }

        let goals = repo.list_active(ws, space, 10).unwrap();
        let mut titles: Vec<_> = goals.iter().map(|g| g.title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Company", "Team"]);
    }
}
