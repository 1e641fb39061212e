//! Read access to the research graph.

use std::sync::Arc;

use uuid::Uuid;

use folio_storage::{Database, ResearchEdge, ResearchNode, ResearchRepository};

use crate::error::PatternError;

/// Graph queries the evaluators depend on.
pub trait GraphQuery: Send + Sync {
    fn nodes(&self, workspace_id: Uuid, kind: &str) -> Result<Vec<ResearchNode>, PatternError>;

    fn edges(&self, workspace_id: Uuid, relation: &str) -> Result<Vec<ResearchEdge>, PatternError>;

    fn all_nodes(&self, workspace_id: Uuid) -> Result<Vec<ResearchNode>, PatternError>;

    fn all_edges(&self, workspace_id: Uuid) -> Result<Vec<ResearchEdge>, PatternError>;
}

/// Graph backed by the `research_nodes` / `research_edges` tables.
pub struct SqliteGraph {
    repo: ResearchRepository,
}

impl SqliteGraph {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: ResearchRepository::new(db),
        }
    }
}

fn graph_err(e: folio_core::error::FolioError) -> PatternError {
    PatternError::Graph(e.to_string())
}

impl GraphQuery for SqliteGraph {
    fn nodes(&self, workspace_id: Uuid, kind: &str) -> Result<Vec<ResearchNode>, PatternError> {
        self.repo.nodes(workspace_id, kind).map_err(graph_err)
    }

    fn edges(&self, workspace_id: Uuid, relation: &str) -> Result<Vec<ResearchEdge>, PatternError> {
        self.repo.edges(workspace_id, relation).map_err(graph_err)
    }

    fn all_nodes(&self, workspace_id: Uuid) -> Result<Vec<ResearchNode>, PatternError> {
        self.repo.all_nodes(workspace_id).map_err(graph_err)
    }

    fn all_edges(&self, workspace_id: Uuid) -> Result<Vec<ResearchEdge>, PatternError> {
        self.repo.all_edges(workspace_id).map_err(graph_err)
    }
}
