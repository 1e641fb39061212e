//! Persistence for single-use approval tokens.

use std::sync::Arc;

use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Timestamp;

use crate::db::{json_at, opt_uuid_at, sql_err, uuid_at, Database};

/// A stored approval grant for a held action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub token: String,
    pub workspace_id: Uuid,
    pub space_id: Option<Uuid>,
    pub user_id: Uuid,
    pub method: String,
    pub params: serde_json::Value,
    pub reason: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub consumed_at: Option<Timestamp>,
}

const APPROVAL_COLUMNS: &str = "token, workspace_id, space_id, user_id, method, params, reason, \
     created_at, expires_at, consumed_at";

pub struct ApprovalRepository {
    db: Arc<Database>,
}

impl ApprovalRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, record: &ApprovalRecord) -> Result<(), FolioError> {
        let params = serde_json::to_string(&record.params)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO agent_approvals ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    APPROVAL_COLUMNS
                ),
                rusqlite::params![
                    record.token,
                    record.workspace_id.to_string(),
                    record.space_id.map(|id| id.to_string()),
                    record.user_id.to_string(),
                    record.method,
                    params,
                    record.reason,
                    record.created_at.0,
                    record.expires_at.0,
                    record.consumed_at.map(|t| t.0),
                ],
            )
            .map_err(sql_err("Failed to insert approval"))?;
            Ok(())
        })
    }

    pub fn find(&self, token: &str) -> Result<Option<ApprovalRecord>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM agent_approvals WHERE token = ?1", APPROVAL_COLUMNS),
                [token],
                row_to_approval,
            )
            .optional()
            .map_err(sql_err("Failed to load approval"))
        })
    }

    /// Mark an unexpired, unconsumed token as consumed and return it.
    ///
    /// A single UPDATE statement decides the winner, so concurrent callers
    /// can never both redeem the same token.
    pub fn redeem(&self, token: &str, now: Timestamp) -> Result<Option<ApprovalRecord>, FolioError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "UPDATE agent_approvals SET consumed_at = ?2
                     WHERE token = ?1 AND consumed_at IS NULL AND expires_at > ?2
                     RETURNING {}",
                    APPROVAL_COLUMNS
                ),
                rusqlite::params![token, now.0],
                row_to_approval,
            )
            .optional()
            .map_err(sql_err("Failed to redeem approval"))
        })
    }

    /// Delete tokens that expired before `before`, consumed or not.
    pub fn purge_expired(&self, before: Timestamp) -> Result<usize, FolioError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM agent_approvals WHERE expires_at < ?1", [before.0])
                .map_err(sql_err("Failed to purge approvals"))
        })
    }
}

fn row_to_approval(row: &Row<'_>) -> rusqlite::Result<ApprovalRecord> {
    Ok(ApprovalRecord {
        token: row.get(0)?,
        workspace_id: uuid_at(row, 1)?,
        space_id: opt_uuid_at(row, 2)?,
        user_id: uuid_at(row, 3)?,
        method: row.get(4)?,
        params: json_at(row, 5)?,
        reason: row.get(6)?,
        created_at: Timestamp(row.get(7)?),
        expires_at: Timestamp(row.get(8)?),
        consumed_at: row.get::<_, Option<i64>>(9)?.map(Timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(token: &str, expires_at: Timestamp) -> ApprovalRecord {
        ApprovalRecord {
            token: token.to_string(),
            workspace_id: Uuid::new_v4(),
            space_id: None,
            user_id: Uuid::new_v4(),
            method: "task.delete".into(),
            params: json!({"taskId": "t-1"}),
            reason: "sensitive-method".into(),
            created_at: Timestamp::now(),
            expires_at,
            consumed_at: None,
        }
    }

    #[test]
    fn test_redeem_is_single_use() {
        let repo = ApprovalRepository::new(Arc::new(Database::in_memory().unwrap()));
        let now = Timestamp::now();
        repo.insert(&record("abc", Timestamp(now.0 + 600))).unwrap();

        let redeemed = repo.redeem("abc", now).unwrap().unwrap();
        assert_eq!(redeemed.method, "task.delete");
        assert_eq!(redeemed.params["taskId"], "t-1");
        assert_eq!(redeemed.consumed_at, Some(now));

        assert!(repo.redeem("abc", now).unwrap().is_none());
        assert!(repo.redeem("missing", now).unwrap().is_none());
    }

    #[test]
    fn test_expired_token_cannot_be_redeemed() {
        let repo = ApprovalRepository::new(Arc::new(Database::in_memory().unwrap()));
        let now = Timestamp::now();
        repo.insert(&record("old", Timestamp(now.0 - 1))).unwrap();

        assert!(repo.redeem("old", now).unwrap().is_none());
        assert!(repo.find("old").unwrap().unwrap().consumed_at.is_none());

        assert_eq!(repo.purge_expired(now).unwrap(), 1);
        assert!(repo.find("old").unwrap().is_none());
    }
}
