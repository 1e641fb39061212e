//! Folio storage crate - SQLite persistence for workspaces, content, agent
//! state, pattern detections, and the event outbox.

pub mod approvals;
pub mod content;
pub mod db;
pub mod detections;
pub mod memory;
pub mod migrations;
pub mod outbox;
pub mod research;
pub mod retention;
pub mod review;
pub mod workspace;

pub use approvals::{ApprovalRecord, ApprovalRepository};
pub use content::{Goal, GoalRepository, Page, PageRepository, Project, ProjectRepository, Task, TaskRepository};
pub use db::Database;
pub use detections::{DetectionRecord, DetectionRepository};
pub use memory::{MemoryEntry, MemoryRepository};
pub use outbox::{EventBus, OutboxEntry, OutboxRepository};
pub use research::{ResearchEdge, ResearchNode, ResearchRepository};
pub use retention::{PurgeResult, RetentionManager};
pub use review::{ReviewPrompt, ReviewPromptRepository};
pub use workspace::{Space, Workspace, WorkspaceRepository};
