//! Application state shared across all route handlers.
//!
//! AppState holds references to the agent and pattern services and the
//! event bus. It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use folio_agent::{
    AgentService, ApprovalLedger, InternalProcessor, LanguageModel, SqliteApprovalLedger,
};
use folio_core::config::FolioConfig;
use folio_core::events::EventSink;
use folio_patterns::{PatternEngine, SqliteGraph};
use folio_storage::{Database, EventBus, WorkspaceRepository};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, with environment overrides applied.
    pub config: Arc<FolioConfig>,
    /// SQLite database for persistent storage.
    pub database: Arc<Database>,
    /// Outbox-backed event bus; also feeds the SSE stream.
    pub events: Arc<EventBus>,
    pub agent: Arc<AgentService>,
    pub patterns: Arc<PatternEngine>,
    pub workspaces: Arc<WorkspaceRepository>,
    /// Bearer token required on protected routes.
    pub api_token: String,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services over one database. `model` is only used when the
    /// runtime options report a configured model and key.
    pub fn new(
        config: FolioConfig,
        database: Arc<Database>,
        model: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        let options = config.runtime_options();
        let events = Arc::new(EventBus::new(Arc::clone(&database)));
        let sink: Arc<dyn EventSink> = events.clone();
        let ledger: Arc<dyn ApprovalLedger> =
            Arc::new(SqliteApprovalLedger::new(Arc::clone(&database)));
        let dispatcher = Arc::new(InternalProcessor::new(
            Arc::clone(&database),
            Arc::clone(&ledger),
            config.agent.approval_ttl_secs,
        ));

        let agent = AgentService::new(
            Arc::clone(&database),
            &config.agent,
            &options,
            ledger,
            dispatcher,
            model,
            Arc::clone(&sink),
        );
        let patterns = PatternEngine::new(
            Arc::clone(&database),
            Arc::new(SqliteGraph::new(Arc::clone(&database))),
            sink,
            config.patterns.clone(),
        );

        Self {
            workspaces: Arc::new(WorkspaceRepository::new(Arc::clone(&database))),
            config: Arc::new(config),
            database,
            events,
            agent: Arc::new(agent),
            patterns: Arc::new(patterns),
            api_token: crate::auth::generate_token(),
            start_time: Instant::now(),
        }
    }

    /// Replace the generated bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = token.into();
        self
    }
}
