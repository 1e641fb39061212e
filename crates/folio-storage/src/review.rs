//! Weekly review prompts proposed by the planner.

use std::sync::Arc;

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Timestamp;

use crate::db::{sql_err, uuid_at, Database};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPrompt {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub space_id: Uuid,
    pub week_key: String,
    pub question: String,
    pub created_at: Timestamp,
    pub consumed_at: Option<Timestamp>,
}

pub struct ReviewPromptRepository {
    db: Arc<Database>,
}

impl ReviewPromptRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store questions for a week, ignoring ones already stored for that
    /// (space, week). Returns how many were new.
    pub fn insert_many(
        &self,
        workspace_id: Uuid,
        space_id: Uuid,
        week_key: &str,
        questions: &[String],
    ) -> Result<usize, FolioError> {
        let now = Timestamp::now().0;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "INSERT INTO agent_review_prompts (id, workspace_id, space_id, week_key, question, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (space_id, week_key, question) DO NOTHING",
                )
                .map_err(sql_err("Failed to prepare review prompt insert"))?;
            let mut inserted = 0;
            for question in questions {
                inserted += stmt
                    .execute(rusqlite::params![
                        Uuid::new_v4().to_string(),
                        workspace_id.to_string(),
                        space_id.to_string(),
                        week_key,
                        question,
                        now,
                    ])
                    .map_err(sql_err("Failed to insert review prompt"))?;
            }
            Ok(inserted)
        })
    }

    /// Unconsumed prompts for a space, optionally limited to one week.
    pub fn list_pending(
        &self,
        space_id: Uuid,
        week_key: Option<&str>,
    ) -> Result<Vec<ReviewPrompt>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, workspace_id, space_id, week_key, question, created_at, consumed_at
                     FROM agent_review_prompts
                     WHERE space_id = ?1 AND consumed_at IS NULL
                       AND (?2 IS NULL OR week_key = ?2)
                     ORDER BY week_key DESC, created_at, rowid",
                )
                .map_err(sql_err("Failed to prepare review prompt list"))?;
            let rows = stmt
                .query_map(rusqlite::params![space_id.to_string(), week_key], row_to_prompt)
                .map_err(sql_err("Failed to list review prompts"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read review prompt row"))
        })
    }

    /// Mark prompts of a space as consumed. Returns how many changed.
    pub fn consume(&self, space_id: Uuid, ids: &[Uuid]) -> Result<usize, FolioError> {
        let now = Timestamp::now().0;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "UPDATE agent_review_prompts SET consumed_at = ?3
                     WHERE id = ?1 AND space_id = ?2 AND consumed_at IS NULL",
                )
                .map_err(sql_err("Failed to prepare review prompt consume"))?;
            let mut changed = 0;
            for id in ids {
                changed += stmt
                    .execute(rusqlite::params![id.to_string(), space_id.to_string(), now])
                    .map_err(sql_err("Failed to consume review prompt"))?;
            }
            Ok(changed)
        })
    }
}

fn row_to_prompt(row: &Row<'_>) -> rusqlite::Result<ReviewPrompt> {
    Ok(ReviewPrompt {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        space_id: uuid_at(row, 2)?,
        week_key: row.get(3)?,
        question: row.get(4)?,
        created_at: Timestamp(row.get(5)?),
        consumed_at: row.get::<_, Option<i64>>(6)?.map(Timestamp),
    })
}
