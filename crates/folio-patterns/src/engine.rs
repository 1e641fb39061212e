//! Runs evaluators for a workspace, records detections, and applies the
//! configured action for each one.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use folio_core::config::PatternConfig;
use folio_core::events::{DomainEvent, EventSink};
use folio_core::types::Timestamp;
use folio_storage::{
    Database, DetectionRecord, DetectionRepository, Task, TaskRepository, WorkspaceRepository,
};

use crate::error::PatternError;
use crate::evaluators::{default_evaluators, Evaluator, ScanContext};
use crate::graph::GraphQuery;
use crate::types::{DetectionStatus, Finding, PatternAction, PatternSettings, ScanReport};

/// Tag put on tasks created from detections.
pub const PATTERN_TASK_TAG: &str = "pattern";

pub struct PatternEngine {
    workspaces: WorkspaceRepository,
    tasks: TaskRepository,
    detections: DetectionRepository,
    graph: Arc<dyn GraphQuery>,
    evaluators: Vec<Box<dyn Evaluator>>,
    events: Arc<dyn EventSink>,
    config: PatternConfig,
}

impl PatternEngine {
    pub fn new(
        db: Arc<Database>,
        graph: Arc<dyn GraphQuery>,
        events: Arc<dyn EventSink>,
        config: PatternConfig,
    ) -> Self {
        Self {
            workspaces: WorkspaceRepository::new(Arc::clone(&db)),
            tasks: TaskRepository::new(Arc::clone(&db)),
            detections: DetectionRepository::new(db),
            graph,
            evaluators: default_evaluators(),
            events,
            config,
        }
    }

    /// Replace the evaluator set.
    pub fn with_evaluators(mut self, evaluators: Vec<Box<dyn Evaluator>>) -> Self {
        self.evaluators = evaluators;
        self
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    pub fn settings(&self, workspace_id: Uuid) -> Result<PatternSettings, PatternError> {
        let document = self.workspaces.get_settings(workspace_id, None)?;
        Ok(PatternSettings::from_document(document.as_ref()))
    }

    /// Workspaces that opted in to scheduled scans.
    pub fn eligible_workspaces(&self) -> Result<Vec<Uuid>, PatternError> {
        let mut eligible = Vec::new();
        for workspace in self.workspaces.list_workspaces()? {
            if self.settings(workspace.id)?.enabled {
                eligible.push(workspace.id);
            }
        }
        Ok(eligible)
    }

    /// Run every enabled evaluator once. The workspace-level `enabled` flag
    /// gates scheduling only; an explicit scan always runs.
    pub fn scan(&self, workspace_id: Uuid, now: Timestamp) -> Result<ScanReport, PatternError> {
        let settings = self.settings(workspace_id)?;
        let ctx = ScanContext {
            workspace_id,
            now,
            config: &self.config,
            graph: self.graph.as_ref(),
            tasks: &self.tasks,
            detections: &self.detections,
        };
        let mut report = ScanReport {
            workspace_id,
            ..Default::default()
        };

        for evaluator in &self.evaluators {
            let pattern = evaluator.pattern_type();
            let rule = settings.rule(pattern);
            if !rule.enabled {
                debug!(workspace_id = %workspace_id, pattern = %pattern, "Pattern disabled");
                continue;
            }
            let findings = match evaluator.evaluate(&ctx) {
                Ok(findings) => findings,
                Err(e) => {
                    warn!(workspace_id = %workspace_id, pattern = %pattern, error = %e, "Evaluator failed");
                    report.failed_evaluators.push(pattern.to_string());
                    continue;
                }
            };
            let mut recorded_all = true;
            for finding in findings {
                match self.record(workspace_id, finding, rule.action, now) {
                    Ok(id) => report.created.push(id),
                    Err(e) => {
                        warn!(workspace_id = %workspace_id, pattern = %pattern, error = %e, "Failed to record detection");
                        recorded_all = false;
                    }
                }
            }
            if !recorded_all {
                report.failed_evaluators.push(pattern.to_string());
            }
        }

        info!(
            workspace_id = %workspace_id,
            created = report.created.len(),
            failed = report.failed_evaluators.len(),
            "Pattern scan complete"
        );
        Ok(report)
    }

    /// Carry out the action, then store the detection. A failed action
    /// leaves no record behind, so the next scan finds the condition again.
    fn record(
        &self,
        workspace_id: Uuid,
        finding: Finding,
        action: PatternAction,
        now: Timestamp,
    ) -> Result<Uuid, PatternError> {
        let mut record = DetectionRecord {
            id: Uuid::new_v4(),
            workspace_id,
            pattern_type: finding.pattern_type.as_str().to_string(),
            severity: finding.severity.as_str().to_string(),
            status: DetectionStatus::Detected.as_str().to_string(),
            title: finding.title,
            description: finding.description,
            dedup_key: finding.dedup_key,
            details: finding.details,
            action_taken: None,
            detected_at: now,
            updated_at: now,
        };

        let task = match action {
            PatternAction::CreateTask => self.create_task(&record)?,
            _ => None,
        };
        if action != PatternAction::CreateTask || task.is_some() {
            record.action_taken = Some(action.as_str().to_string());
        }

        if let Err(e) = self.detections.insert(&record) {
            if let Some(task_id) = task {
                if let Err(undo) = self.tasks.delete(task_id) {
                    warn!(task_id = %task_id, error = %undo, "Failed to remove task of unrecorded detection");
                }
            }
            return Err(e.into());
        }

        if matches!(action, PatternAction::Notify | PatternAction::Surface) {
            self.events.publish(DomainEvent::PatternDetected {
                workspace_id: record.workspace_id,
                detection_id: record.id,
                pattern_type: record.pattern_type.clone(),
                severity: record.severity.clone(),
                title: record.title.clone(),
                surface: action == PatternAction::Surface,
                timestamp: record.detected_at,
            });
        }
        Ok(record.id)
    }

    /// Task in the oldest active space, or `None` when the workspace has none.
    fn create_task(&self, record: &DetectionRecord) -> Result<Option<Uuid>, PatternError> {
        let Some(space) = self.workspaces.oldest_active_space(record.workspace_id)? else {
            warn!(workspace_id = %record.workspace_id, "No active space, task not created");
            return Ok(None);
        };
        let mut task = Task::new(record.workspace_id, space.id, &record.title);
        task.description = record.description.clone();
        task.tags = vec![PATTERN_TASK_TAG.to_string(), record.pattern_type.clone()];
        self.tasks.insert(&task)?;
        debug!(task_id = %task.id, detection_id = %record.id, "Task created from detection");
        Ok(Some(task.id))
    }

    pub fn list(
        &self,
        workspace_id: Uuid,
        status: Option<DetectionStatus>,
        limit: usize,
    ) -> Result<Vec<DetectionRecord>, PatternError> {
        Ok(self
            .detections
            .list(workspace_id, status.map(|s| s.as_str()), limit)?)
    }

    pub fn acknowledge(&self, workspace_id: Uuid, id: Uuid) -> Result<DetectionRecord, PatternError> {
        self.transition(workspace_id, id, DetectionStatus::Acknowledged)
    }

    pub fn dismiss(&self, workspace_id: Uuid, id: Uuid) -> Result<DetectionRecord, PatternError> {
        self.transition(workspace_id, id, DetectionStatus::Dismissed)
    }

    fn transition(
        &self,
        workspace_id: Uuid,
        id: Uuid,
        next: DetectionStatus,
    ) -> Result<DetectionRecord, PatternError> {
        let record = self
            .detections
            .find(id)?
            .filter(|r| r.workspace_id == workspace_id)
            .ok_or_else(|| PatternError::NotFound(id.to_string()))?;
        let invalid = || PatternError::InvalidTransition {
            from: record.status.clone(),
            to: next.as_str().to_string(),
        };
        let current: DetectionStatus = record.status.parse().map_err(|_| invalid())?;
        if !current.can_transition_to(next) {
            return Err(invalid());
        }
        // Guarded on the stored status so a concurrent change wins.
        if !self.detections.transition(id, current.as_str(), next.as_str())? {
            return Err(invalid());
        }
        self.detections
            .find(id)?
            .ok_or_else(|| PatternError::NotFound(id.to_string()))
    }
}
