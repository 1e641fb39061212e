//! Persistence for pattern detections.

use std::sync::Arc;

use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Timestamp;

use crate::db::{json_at, sql_err, uuid_at, Database};

/// A stored detection. Enum-valued columns are kept as their wire strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub pattern_type: String,
    pub severity: String,
    pub status: String,
    pub title: String,
    pub description: String,
    pub dedup_key: String,
    pub details: serde_json::Value,
    pub action_taken: Option<String>,
    pub detected_at: Timestamp,
    pub updated_at: Timestamp,
}

const DETECTION_COLUMNS: &str = "id, workspace_id, pattern_type, severity, status, title, \
     description, dedup_key, details, action_taken, detected_at, updated_at";

pub struct DetectionRepository {
    db: Arc<Database>,
}

impl DetectionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, record: &DetectionRecord) -> Result<(), FolioError> {
        let details = serde_json::to_string(&record.details)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO pattern_detections ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    DETECTION_COLUMNS
                ),
                rusqlite::params![
                    record.id.to_string(),
                    record.workspace_id.to_string(),
                    record.pattern_type,
                    record.severity,
                    record.status,
                    record.title,
                    record.description,
                    record.dedup_key,
                    details,
                    record.action_taken,
                    record.detected_at.0,
                    record.updated_at.0,
                ],
            )
            .map_err(sql_err("Failed to insert detection"))?;
            Ok(())
        })
    }

    /// Whether a non-dismissed detection with this key already exists.
    pub fn exists_open(
        &self,
        workspace_id: Uuid,
        pattern_type: &str,
        dedup_key: &str,
    ) -> Result<bool, FolioError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM pattern_detections
                     WHERE workspace_id = ?1 AND pattern_type = ?2 AND dedup_key = ?3
                       AND status != 'dismissed'",
                    rusqlite::params![workspace_id.to_string(), pattern_type, dedup_key],
                    |row| row.get(0),
                )
                .map_err(sql_err("Failed to check detection"))?;
            Ok(count > 0)
        })
    }

    pub fn find(&self, id: Uuid) -> Result<Option<DetectionRecord>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM pattern_detections WHERE id = ?1", DETECTION_COLUMNS),
                [id.to_string()],
                row_to_detection,
            )
            .optional()
            .map_err(sql_err("Failed to load detection"))
        })
    }

    pub fn list(
        &self,
        workspace_id: Uuid,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DetectionRecord>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM pattern_detections
                     WHERE workspace_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY detected_at DESC, rowid DESC LIMIT ?3",
                    DETECTION_COLUMNS
                ))
                .map_err(sql_err("Failed to prepare detection list"))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![workspace_id.to_string(), status, limit as i64],
                    row_to_detection,
                )
                .map_err(sql_err("Failed to list detections"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read detection row"))
        })
    }

    /// Move a detection from `from` to `to`. Returns false when the stored
    /// status no longer equals `from`.
    pub fn transition(&self, id: Uuid, from: &str, to: &str) -> Result<bool, FolioError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE pattern_detections SET status = ?3, updated_at = ?4
                     WHERE id = ?1 AND status = ?2",
                    rusqlite::params![id.to_string(), from, to, Timestamp::now().0],
                )
                .map_err(sql_err("Failed to update detection status"))?;
            Ok(changed == 1)
        })
    }
}

fn row_to_detection(row: &Row<'_>) -> rusqlite::Result<DetectionRecord> {
    Ok(DetectionRecord {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        pattern_type: row.get(2)?,
        severity: row.get(3)?,
        status: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        dedup_key: row.get(7)?,
        details: json_at(row, 8)?,
        action_taken: row.get(9)?,
        detected_at: Timestamp(row.get(10)?),
        updated_at: Timestamp(row.get(11)?),
    })
}
