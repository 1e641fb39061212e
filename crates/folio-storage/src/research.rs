//! Research graph tables: typed nodes and labelled edges.

use std::sync::Arc;

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Timestamp;

use crate::db::{sql_err, uuid_at, Database};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchNode {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// `hypothesis`, `claim`, `experiment`, `finding`, `source`, ...
    pub kind: String,
    pub title: String,
    pub domain: Option<String>,
    pub status: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ResearchNode {
    pub fn new(workspace_id: Uuid, kind: &str, title: &str) -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            kind: kind.to_string(),
            title: title.to_string(),
            domain: None,
            status: "open".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchEdge {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub from_id: Uuid,
    pub to_id: Uuid,
    /// `validates`, `contradicts`, `supports`, `tests`, `fails_to_reproduce`, ...
    pub relation: String,
    pub created_at: Timestamp,
}

pub struct ResearchRepository {
    db: Arc<Database>,
}

impl ResearchRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert_node(&self, node: &ResearchNode) -> Result<(), FolioError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO research_nodes (id, workspace_id, kind, title, domain, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    node.id.to_string(),
                    node.workspace_id.to_string(),
                    node.kind,
                    node.title,
                    node.domain,
                    node.status,
                    node.created_at.0,
                    node.updated_at.0,
                ],
            )
            .map_err(sql_err("Failed to insert research node"))?;
            Ok(())
        })
    }

    pub fn link(
        &self,
        workspace_id: Uuid,
        from_id: Uuid,
        to_id: Uuid,
        relation: &str,
    ) -> Result<ResearchEdge, FolioError> {
        let edge = ResearchEdge {
            id: Uuid::new_v4(),
            workspace_id,
            from_id,
            to_id,
            relation: relation.to_string(),
            created_at: Timestamp::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO research_edges (id, workspace_id, from_id, to_id, relation, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    edge.id.to_string(),
                    edge.workspace_id.to_string(),
                    edge.from_id.to_string(),
                    edge.to_id.to_string(),
                    edge.relation,
                    edge.created_at.0,
                ],
            )
            .map_err(sql_err("Failed to insert research edge"))?;
            Ok(())
        })?;
        Ok(edge)
    }

    pub fn nodes(&self, workspace_id: Uuid, kind: &str) -> Result<Vec<ResearchNode>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, workspace_id, kind, title, domain, status, created_at, updated_at
                     FROM research_nodes WHERE workspace_id = ?1 AND kind = ?2 ORDER BY created_at",
                )
                .map_err(sql_err("Failed to prepare node query"))?;
            let rows = stmt
                .query_map(rusqlite::params![workspace_id.to_string(), kind], row_to_node)
                .map_err(sql_err("Failed to query nodes"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read node row"))
        })
    }

    /// Every node of the workspace, keyed lookups are done by the caller.
    pub fn all_nodes(&self, workspace_id: Uuid) -> Result<Vec<ResearchNode>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, workspace_id, kind, title, domain, status, created_at, updated_at
                     FROM research_nodes WHERE workspace_id = ?1 ORDER BY created_at",
                )
                .map_err(sql_err("Failed to prepare node query"))?;
            let rows = stmt
                .query_map([workspace_id.to_string()], row_to_node)
                .map_err(sql_err("Failed to query nodes"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read node row"))
        })
    }

    pub fn edges(&self, workspace_id: Uuid, relation: &str) -> Result<Vec<ResearchEdge>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, workspace_id, from_id, to_id, relation, created_at
                     FROM research_edges WHERE workspace_id = ?1 AND relation = ?2 ORDER BY created_at",
                )
                .map_err(sql_err("Failed to prepare edge query"))?;
            let rows = stmt
                .query_map(rusqlite::params![workspace_id.to_string(), relation], row_to_edge)
                .map_err(sql_err("Failed to query edges"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read edge row"))
        })
    }

    pub fn all_edges(&self, workspace_id: Uuid) -> Result<Vec<ResearchEdge>, FolioError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, workspace_id, from_id, to_id, relation, created_at
                     FROM research_edges WHERE workspace_id = ?1 ORDER BY created_at",
                )
                .map_err(sql_err("Failed to prepare edge query"))?;
            let rows = stmt
                .query_map([workspace_id.to_string()], row_to_edge)
                .map_err(sql_err("Failed to query edges"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_err("Failed to read edge row"))
        })
    }
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<ResearchEdge> {
    Ok(ResearchEdge {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        from_id: uuid_at(row, 2)?,
        to_id: uuid_at(row, 3)?,
        relation: row.get(4)?,
        created_at: Timestamp(row.get(5)?),
    })
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<ResearchNode> {
    Ok(ResearchNode {
        id: uuid_at(row, 0)?,
        workspace_id: uuid_at(row, 1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        domain: row.get(4)?,
        status: row.get(5)?,
        created_at: Timestamp(row.get(6)?),
        updated_at: Timestamp(row.get(7)?),
    })
}
