//! In-process request processor that applies actions to workspace storage.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Timestamp;
use folio_storage::{
    Database, Page, PageRepository, Project, ProjectRepository, ResearchNode, ResearchRepository,
    Task, TaskRepository,
};

use super::{
    ActionDispatcher, DispatchContext, RpcError, RpcRequest, RpcResponse, APPROVAL_REQUIRED,
    INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, NOT_FOUND,
};
use crate::actions::AgentAction;
use crate::approval::ApprovalLedger;
use crate::types::{ActionMethod, ActorContext, DecisionReason};

/// Applies the ten agent methods against SQLite.
///
/// Sensitive methods are refused with `APPROVAL_REQUIRED` unless the context
/// carries a redeemed approval.
pub struct InternalProcessor {
    tasks: TaskRepository,
    pages: PageRepository,
    projects: ProjectRepository,
    research: ResearchRepository,
    ledger: Arc<dyn ApprovalLedger>,
    approval_ttl_secs: u64,
}

impl InternalProcessor {
    pub fn new(db: Arc<Database>, ledger: Arc<dyn ApprovalLedger>, approval_ttl_secs: u64) -> Self {
        Self {
            tasks: TaskRepository::new(Arc::clone(&db)),
            pages: PageRepository::new(Arc::clone(&db)),
            projects: ProjectRepository::new(Arc::clone(&db)),
            research: ResearchRepository::new(db),
            ledger,
            approval_ttl_secs,
        }
    }

    fn process(&self, ctx: &DispatchContext, request: &RpcRequest) -> Result<Value, RpcError> {
        let method: ActionMethod = request
            .method
            .parse()
            .map_err(|e: String| RpcError::new(METHOD_NOT_FOUND, e))?;
        let action = AgentAction::parse(method, &request.params)
            .map_err(|e| RpcError::new(INVALID_PARAMS, format!("Invalid params: {}", e)))?;

        if method.is_sensitive() && !ctx.approved {
            let grant = self
                .ledger
                .create_approval(
                    &ctx.actor,
                    method.as_str(),
                    &request.params,
                    DecisionReason::SensitiveMethod.as_str(),
                    self.approval_ttl_secs,
                )
                .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;
            return Err(RpcError::new(APPROVAL_REQUIRED, "Approval required").with_data(json!({
                "approvalToken": grant.token,
                "expiresAt": grant.expires_at,
            })));
        }

        self.apply(&ctx.actor, action).map_err(|e| match e {
            ApplyError::NotFound(what) => RpcError::new(NOT_FOUND, format!("{} not found", what)),
            ApplyError::Storage(e) => {
                warn!(method = %method, error = %e, "Dispatch failed in storage");
                RpcError::new(INTERNAL_ERROR, e.to_string())
            }
        })
    }

    fn apply(&self, actor: &ActorContext, action: AgentAction) -> Result<Value, ApplyError> {
        match action {
            AgentAction::TaskCreate(p) => {
                if let Some(project_id) = p.project_id {
                    self.project_in_workspace(actor, project_id)?;
                }
                let mut task = Task::new(actor.workspace_id, actor.space_id, &p.title);
                task.description = p.description.unwrap_or_default();
                if let Some(status) = p.status {
                    task.status = status.as_str().to_string();
                }
                if let Some(priority) = p.priority {
                    task.priority = priority.as_str().to_string();
                }
                task.bucket = p.bucket.map(|b| b.as_str().to_string());
                task.due_date = p.due_date;
                task.project_id = p.project_id;
                task.tags = p.tags;
                task.created_by = Some(actor.user_id);
                if task.status == "done" {
                    task.completed_at = Some(Timestamp::now());
                }
                self.tasks.insert(&task)?;
                Ok(json!({"id": task.id, "title": task.title, "created": true}))
            }
            AgentAction::TaskUpdate(p) => {
                let mut task = self
                    .tasks
                    .find(p.id)?
                    .filter(|t| t.workspace_id == actor.workspace_id)
                    .ok_or(ApplyError::NotFound("Task"))?;
                if let Some(title) = p.title {
                    task.title = title;
                }
                if let Some(description) = p.description {
                    task.description = description;
                }
                if let Some(status) = p.status {
                    task.status = status.as_str().to_string();
                }
                if let Some(priority) = p.priority {
                    task.priority = priority.as_str().to_string();
                }
                if let Some(bucket) = p.bucket {
                    task.bucket = Some(bucket.as_str().to_string());
                }
                if p.due_date.is_some() {
                    task.due_date = p.due_date;
                }
                self.tasks.update(&task)?;
                Ok(json!({"id": task.id, "updated": true}))
            }
            AgentAction::TaskDelete(p) => {
                self.tasks
                    .find(p.id)?
                    .filter(|t| t.workspace_id == actor.workspace_id)
                    .ok_or(ApplyError::NotFound("Task"))?;
                self.tasks.delete(p.id)?;
                Ok(json!({"id": p.id, "deleted": true}))
            }
            AgentAction::PageCreate(p) => {
                let mut page = Page::new(actor.workspace_id, actor.space_id, &p.title);
                page.content = p.content;
                page.parent_page_id = p.parent_page_id;
                page.generated_key = p.generated_key;
                page.created_by = Some(actor.user_id);
                let (page, created) = self.pages.insert(&page)?;
                if !created {
                    debug!(page_id = %page.id, "Generated page already exists");
                }
                Ok(json!({"id": page.id, "title": page.title, "created": created}))
            }
            AgentAction::PageUpdate(p) => {
                self.page_in_workspace(actor, p.id)?;
                self.pages
                    .update(p.id, p.title.as_deref(), p.content.as_deref())?;
                Ok(json!({"id": p.id, "updated": true}))
            }
            AgentAction::PageDelete(p) => {
                self.page_in_workspace(actor, p.id)?;
                self.pages.soft_delete(p.id)?;
                Ok(json!({"id": p.id, "deleted": true}))
            }
            AgentAction::ProjectCreate(p) => {
                let now = Timestamp::now();
                let project = Project {
                    id: Uuid::new_v4(),
                    workspace_id: actor.workspace_id,
                    space_id: actor.space_id,
                    name: p.name,
                    description: p.description.unwrap_or_default(),
                    status: "active".to_string(),
                    created_at: now,
                    updated_at: now,
                };
                self.projects.insert(&project)?;
                Ok(json!({"id": project.id, "name": project.name, "created": true}))
            }
            AgentAction::ProjectUpdate(p) => {
                self.project_in_workspace(actor, p.id)?;
                self.projects.update(
                    p.id,
                    p.name.as_deref(),
                    p.description.as_deref(),
                    p.status.map(|s| s.as_str()),
                )?;
                Ok(json!({"id": p.id, "updated": true}))
            }
            AgentAction::ProjectArchive(p) => {
                self.project_in_workspace(actor, p.id)?;
                self.projects.update(p.id, None, None, Some("archived"))?;
                Ok(json!({"id": p.id, "archived": true}))
            }
            AgentAction::ResearchCreate(p) => {
                let mut node = ResearchNode::new(actor.workspace_id, &p.kind, &p.title);
                node.domain = p.domain;
                self.research.insert_node(&node)?;
                Ok(json!({"id": node.id, "kind": node.kind, "created": true}))
            }
        }
    }

    fn project_in_workspace(&self, actor: &ActorContext, id: Uuid) -> Result<(), ApplyError> {
        self.projects
            .find(id)?
            .filter(|p| p.workspace_id == actor.workspace_id)
            .map(|_| ())
            .ok_or(ApplyError::NotFound("Project"))
    }

    fn page_in_workspace(&self, actor: &ActorContext, id: Uuid) -> Result<(), ApplyError> {
        self.pages
            .find(id)?
            .filter(|p| p.workspace_id == actor.workspace_id)
            .map(|_| ())
            .ok_or(ApplyError::NotFound("Page"))
    }
}

enum ApplyError {
    NotFound(&'static str),
    Storage(FolioError),
}

impl From<FolioError> for ApplyError {
    fn from(e: FolioError) -> Self {
        ApplyError::Storage(e)
    }
}

#[async_trait]
impl ActionDispatcher for InternalProcessor {
    async fn dispatch(&self, ctx: &DispatchContext, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        match self.process(ctx, &request) {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::failure(id, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::InMemoryApprovalLedger;

    struct Fixture {
        processor: InternalProcessor,
        ledger: Arc<InMemoryApprovalLedger>,
        db: Arc<Database>,
        actor: ActorContext,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let ledger = Arc::new(InMemoryApprovalLedger::new());
        let processor = InternalProcessor::new(Arc::clone(&db), ledger.clone(), 600);
        Fixture {
            processor,
            ledger,
            db,
            actor: ActorContext {
                workspace_id: Uuid::new_v4(),
                space_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
            },
        }
    }

    async fn call(f: &Fixture, method: &str, params: Value, approved: bool) -> RpcResponse {
        let ctx = if approved {
            DispatchContext::approved(f.actor)
        } else {
            DispatchContext::new(f.actor)
        };
        f.processor
            .dispatch(&ctx, RpcRequest::new(method, params, 1))
            .await
    }

    #[tokio::test]
    async fn test_task_create_and_update() {
        let f = fixture();
        let created = call(&f, "task.create", json!({"title": "Write report", "priority": "high"}), false)
            .await
            .into_result()
            .unwrap();
        let id: Uuid = serde_json::from_value(created["id"].clone()).unwrap();

        call(&f, "task.update", json!({"id": id, "status": "done"}), false)
            .await
            .into_result()
            .unwrap();

        let task = TaskRepository::new(Arc::clone(&f.db)).find(id).unwrap().unwrap();
        assert_eq!(task.priority, "high");
        assert_eq!(task.status, "done");
        assert!(task.completed_at.is_some());
        assert_eq!(task.created_by, Some(f.actor.user_id));
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let f = fixture();
        let err = call(&f, "task.explode", json!({}), false).await.into_result().unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);

        let err = call(&f, "task.update", json!({"title": "no id"}), false)
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_sensitive_method_needs_approval() {
        let f = fixture();
        let created = call(&f, "task.create", json!({"title": "Temp"}), false)
            .await
            .into_result()
            .unwrap();

        let err = call(&f, "task.delete", json!({"id": created["id"]}), false)
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, APPROVAL_REQUIRED);
        assert!(err.approval_token().is_some());
        assert_eq!(f.ledger.issued(), 1);

        let deleted = call(&f, "task.delete", json!({"id": created["id"]}), true)
            .await
            .into_result()
            .unwrap();
        assert_eq!(deleted["deleted"], true);
    }

    #[tokio::test]
    async fn test_missing_target_is_not_found() {
        let f = fixture();
        let err = call(&f, "page.update", json!({"id": Uuid::new_v4(), "title": "x"}), false)
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(err.code, NOT_FOUND);
    }

    #[tokio::test]
    async fn test_generated_page_upsert_returns_existing() {
        let f = fixture();
        let params = json!({"title": "Daily Focus 2026-10-18", "generatedKey": "daily-focus:2026-10-18"});
        let first = call(&f, "page.create", params.clone(), false).await.into_result().unwrap();
        let second = call(&f, "page.create", params, false).await.into_result().unwrap();
        assert_eq!(first["created"], true);
        assert_eq!(second["created"], false);
        assert_eq!(first["id"], second["id"]);
    }

    #[tokio::test]
    async fn test_project_archive_with_approval() {
        let f = fixture();
        let created = call(&f, "project.create", json!({"name": "Apollo"}), false)
            .await
            .into_result()
            .unwrap();
        let id: Uuid = serde_json::from_value(created["id"].clone()).unwrap();

        call(&f, "project.archive", json!({"id": id}), true)
            .await
            .into_result()
            .unwrap();
        let project = ProjectRepository::new(Arc::clone(&f.db)).find(id).unwrap().unwrap();
        assert_eq!(project.status, "archived");
    }
}
