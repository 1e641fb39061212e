//! Workspaces, spaces, and the raw agent settings documents attached to them.

use std::sync::Arc;

use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Timestamp;

use crate::db::{opt_uuid_at, sql_err, uuid_at, Database};

/// A tenant. The owner is the identity scheduled runs act as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<Uuid>,
    pub created_at: Timestamp,
}

/// A sub-area of a workspace with its own tasks, pages, and schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub created_at: Timestamp,
    pub archived_at: Option<Timestamp>,
}

/// Repository for workspaces and spaces.
pub struct WorkspaceRepository {
    db: Arc<Database>,
}

impl WorkspaceRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create_workspace(
        &self,
        name: &str,
        owner_id: Option<Uuid>,
    ) -> Result<Workspace, FolioError> {
        let workspace = Workspace {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_id,
            created_at: Timestamp::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workspaces (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    workspace.id.to_string(),
                    workspace.name,
                    workspace.owner_id.map(|id| id.to_string()),
                    workspace.created_at.0,
                ],
            )
            .map_err(sql_err("Failed to create workspace"))?;
            Ok(())
        })?;
        Ok(workspace)
    }

    pub fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, owner_id, created_at FROM workspaces WHERE id = ?1",
                [id.to_string()],
                row_to_workspace,
            )
            .optional()
            .map_err(sql_err("Failed to load workspace"))
        })
    }

    pub fn list_workspaces(&self) -> Result<Vec<Workspace>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, owner_id, created_at FROM workspaces ORDER BY created_at")
                .map_err(sql_err("Failed to prepare workspace list"))?;
            let rows = stmt
                .query_map([], row_to_workspace)
                .map_err(sql_err("Failed to list workspaces"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read workspace row"))
        })
    }

    pub fn create_space(&self, workspace_id: Uuid, name: &str) -> Result<Space, FolioError> {
        let space = Space {
            id: Uuid::new_v4(),
            workspace_id,
            name: name.to_string(),
            created_at: Timestamp::now(),
            archived_at: None,
        };
        self.insert_space(&space)?;
        Ok(space)
    }

    /// Insert a fully-specified space. Tests use this to control creation order.
    pub fn insert_space(&self, space: &Space) -> Result<(), FolioError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO spaces (id, workspace_id, name, created_at, archived_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    space.id.to_string(),
                    space.workspace_id.to_string(),
                    space.name,
                    space.created_at.0,
                    space.archived_at.map(|t| t.0),
                ],
            )
            .map_err(sql_err("Failed to create space"))?;
            Ok(())
        })
    }

    pub fn get_space(&self, id: Uuid) -> Result<Option<Space>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, workspace_id, name, created_at, archived_at FROM spaces WHERE id = ?1",
                [id.to_string()],
                row_to_space,
            )
            .optional()
            .map_err(sql_err("Failed to load space"))
        })
    }

    /// Non-archived spaces of a workspace, oldest first.
    pub fn list_active_spaces(&self, workspace_id: Uuid) -> Result<Vec<Space>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, workspace_id, name, created_at, archived_at FROM spaces
                     WHERE workspace_id = ?1 AND archived_at IS NULL
                     ORDER BY created_at ASC, rowid ASC",
                )
                .map_err(sql_err("Failed to prepare space list"))?;
            let rows = stmt
                .query_map([workspace_id.to_string()], row_to_space)
                .map_err(sql_err("Failed to list spaces"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read space row"))
        })
    }

    pub fn oldest_active_space(&self, workspace_id: Uuid) -> Result<Option<Space>, FolioError> {
        Ok(self.list_active_spaces(workspace_id)?.into_iter().next())
    }

    pub fn archive_space(&self, id: Uuid) -> Result<bool, FolioError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE spaces SET archived_at = ?2 WHERE id = ?1 AND archived_at IS NULL",
                    rusqlite::params![id.to_string(), Timestamp::now().0],
                )
                .map_err(sql_err("Failed to archive space"))?;
            Ok(changed == 1)
        })
    }

    /// Raw settings document for the workspace (`space_id = None`) or a space override.
    pub fn get_settings(
        &self,
        workspace_id: Uuid,
        space_id: Option<Uuid>,
    ) -> Result<Option<serde_json::Value>, FolioError> {
        let raw: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT settings FROM agent_settings WHERE workspace_id = ?1 AND space_id = ?2",
                rusqlite::params![workspace_id.to_string(), settings_scope(space_id)],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("Failed to load agent settings"))
        })?;
        raw.map(|s| serde_json::from_str(&s).map_err(FolioError::from))
            .transpose()
    }

    pub fn put_settings(
        &self,
        workspace_id: Uuid,
        space_id: Option<Uuid>,
        settings: &serde_json::Value,
    ) -> Result<(), FolioError> {
        let raw = serde_json::to_string(settings)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agent_settings (workspace_id, space_id, settings, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (workspace_id, space_id)
                 DO UPDATE SET settings = excluded.settings, updated_at = excluded.updated_at",
                rusqlite::params![
                    workspace_id.to_string(),
                    settings_scope(space_id),
                    raw,
                    Timestamp::now().0,
                ],
            )
            .map_err(sql_err("Failed to save agent settings"))?;
            Ok(())
        })
    }
}

fn settings_scope(space_id: Option<Uuid>) -> String {
    space_id.map(|id| id.to_string()).unwrap_or_default()
}

fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        owner_id: opt_uuid_at(row, 2)?,
        created_at: Timestamp(row.get(3)?),
    })
}

fn row_to_space(row: &Row<'_>) -> rusqlite::Result<Space> {
    Ok(Space {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        created_at: Timestamp(row.get(3)?),
        archived_at: row.get::<_, Option<i64>>(4)?.map(Timestamp),
    })
}
