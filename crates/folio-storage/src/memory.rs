//! Memory store: free-form entries tagged by kind.
//!
//! Holds agent audit records, plans, handoff briefs, and the user memories
//! that feed the planning context.

use std::sync::Arc;

use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Timestamp;

use crate::db::{json_at, opt_uuid_at, sql_err, uuid_at, Database};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub space_id: Option<Uuid>,
    /// Producer of the entry, e.g. `user`, `agent-audit`, `agent-plan`.
    pub source: String,
    pub tags: Vec<String>,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: Timestamp,
}

impl MemoryEntry {
    pub fn new(workspace_id: Uuid, space_id: Option<Uuid>, source: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            space_id,
            source: source.to_string(),
            tags: Vec::new(),
            content: content.to_string(),
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Timestamp::now(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

const MEMORY_COLUMNS: &str =
    "id, workspace_id, space_id, source, tags, content, metadata, created_at";

pub struct MemoryRepository {
    db: Arc<Database>,
}

impl MemoryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, entry: &MemoryEntry) -> Result<(), FolioError> {
        let tags = serde_json::to_string(&entry.tags)?;
        let metadata = serde_json::to_string(&entry.metadata)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO memories ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    MEMORY_COLUMNS
                ),
                rusqlite::params![
                    entry.id.to_string(),
                    entry.workspace_id.to_string(),
                    entry.space_id.map(|id| id.to_string()),
                    entry.source,
                    tags,
                    entry.content,
                    metadata,
                    entry.created_at.0,
                ],
            )
            .map_err(sql_err("Failed to insert memory"))?;
            Ok(())
        })
    }

    pub fn find(&self, id: Uuid) -> Result<Option<MemoryEntry>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS),
                [id.to_string()],
                row_to_memory,
            )
            .optional()
            .map_err(sql_err("Failed to load memory"))
        })
    }

    /// Most recent entries for a space (including workspace-wide ones), newest first.
    pub fn recent(
        &self,
        workspace_id: Uuid,
        space_id: Uuid,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, FolioError> {
        self.query_many(
            &format!(
                "SELECT {} FROM memories
                 WHERE workspace_id = ?1 AND (space_id IS NULL OR space_id = ?2)
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3",
                MEMORY_COLUMNS
            ),
            rusqlite::params![workspace_id.to_string(), space_id.to_string(), limit as i64],
        )
    }

    /// Entries carrying `tag`, newest first.
    pub fn with_tag(
        &self,
        workspace_id: Uuid,
        space_id: Uuid,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, FolioError> {
        self.query_many(
            &format!(
                "SELECT {} FROM memories
                 WHERE workspace_id = ?1 AND (space_id IS NULL OR space_id = ?2)
                   AND EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE value = ?3)
                 ORDER BY created_at DESC, rowid DESC LIMIT ?4",
                MEMORY_COLUMNS
            ),
            rusqlite::params![
                workspace_id.to_string(),
                space_id.to_string(),
                tag,
                limit as i64
            ],
        )
    }

    /// Entries produced by `source` for exactly this space, newest first.
    pub fn by_source(
        &self,
        workspace_id: Uuid,
        space_id: Uuid,
        source: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, FolioError> {
        self.query_many(
            &format!(
                "SELECT {} FROM memories
                 WHERE workspace_id = ?1 AND space_id = ?2 AND source = ?3
                 ORDER BY created_at DESC, rowid DESC LIMIT ?4",
                MEMORY_COLUMNS
            ),
            rusqlite::params![
                workspace_id.to_string(),
                space_id.to_string(),
                source,
                limit as i64
            ],
        )
    }

    /// Replace the tags and metadata of an entry.
    pub fn update_tags_and_metadata(
        &self,
        id: Uuid,
        tags: &[String],
        metadata: &serde_json::Value,
    ) -> Result<bool, FolioError> {
        let tags = serde_json::to_string(tags)?;
        let metadata = serde_json::to_string(metadata)?;
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE memories SET tags = ?2, metadata = ?3 WHERE id = ?1",
                    rusqlite::params![id.to_string(), tags, metadata],
                )
                .map_err(sql_err("Failed to update memory"))?;
            Ok(changed == 1)
        })
    }

    fn query_many(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<MemoryEntry>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(sql_err("Failed to prepare memory query"))?;
            let rows = stmt
                .query_map(params, row_to_memory)
                .map_err(sql_err("Failed to query memories"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read memory row"))
        })
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        space_id: opt_uuid_at(row, 2)?,
        source: row.get(3)?,
        tags: json_at(row, 4)?,
        content: row.get(5)?,
        metadata: json_at(row, 6)?,
        created_at: Timestamp(row.get(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_query_and_ordering() {
        let repo = MemoryRepository::new(Arc::new(Database::in_memory().unwrap()));
        let ws = Uuid::new_v4();
        let space = Uuid::new_v4();

        let mut older = MemoryEntry::new(ws, Some(space), "user", "Prefers mornings")
            .with_tags(["profile"]);
        older.created_at = Timestamp(100);
        let newer = MemoryEntry::new(ws, None, "user", "Works in Rust").with_tags(["profile"]);
        let other = MemoryEntry::new(ws, Some(space), "user", "Q4 launch").with_tags(["topic"]);
        for entry in [&older, &newer, &other] {
            repo.insert(entry).unwrap();
        }

        let profile = repo.with_tag(ws, space, "profile", 10).unwrap();
        assert_eq!(profile.len(), 2);
        assert_eq!(profile[0].content, "Works in Rust");

        let recent = repo.recent(ws, space, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|m| m.content != "Prefers mornings"));
    }

    #[test]
    fn test_update_tags_and_metadata() {
        let repo = MemoryRepository::new(Arc::new(Database::in_memory().unwrap()));
        let ws = Uuid::new_v4();
        let space = Uuid::new_v4();
        let entry = MemoryEntry::new(ws, Some(space), "agent-plan", "Plan text")
            .with_tags(["agent-plan", "status:pending"])
            .with_metadata(json!({"status": "pending"}));
        repo.insert(&entry).unwrap();

        let tags = vec!["agent-plan".to_string(), "status:active".to_string()];
        assert!(repo
            .update_tags_and_metadata(entry.id, &tags, &json!({"status": "active"}))
            .unwrap());

        let loaded = repo.find(entry.id).unwrap().unwrap();
        assert!(loaded.has_tag("status:active"));
        assert_eq!(loaded.metadata["status"], "active");
        assert_eq!(repo.by_source(ws, space, "agent-plan", 5).unwrap().len(), 1);
    }
}
