//! Strongly-typed agent settings.
//!
//! Settings are stored as camelCase JSON documents: one per workspace plus an
//! optional override per space. [`SettingsService::resolve`] deep-merges the
//! override over the workspace document and deserializes the result once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use folio_core::error::FolioError;
use folio_core::types::Cadence;
use folio_storage::{Database, WorkspaceRepository};

use crate::error::AgentError;
use crate::types::PermissionKey;

/// Per-workspace agent behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub enabled: bool,
    pub allow_task_writes: bool,
    pub allow_page_writes: bool,
    pub allow_project_writes: bool,
    pub allow_research_writes: bool,
    pub enable_planner: bool,
    pub enable_autonomous_loop: bool,
    pub enable_triage: bool,
    pub enable_proactive_questions: bool,
    pub policy: ActionPolicy,
    pub autonomy_schedule: AutonomySchedule,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_task_writes: true,
            allow_page_writes: true,
            allow_project_writes: true,
            allow_research_writes: true,
            enable_planner: true,
            enable_autonomous_loop: false,
            enable_triage: true,
            enable_proactive_questions: false,
            policy: ActionPolicy::default(),
            autonomy_schedule: AutonomySchedule::default(),
        }
    }
}

impl AgentSettings {
    pub fn allows_writes(&self, key: PermissionKey) -> bool {
        match key {
            PermissionKey::Tasks => self.allow_task_writes,
            PermissionKey::Pages => self.allow_page_writes,
            PermissionKey::Projects => self.allow_project_writes,
            PermissionKey::Research => self.allow_research_writes,
        }
    }

    /// Whether the autonomous loop may run at all.
    pub fn loop_enabled(&self) -> bool {
        self.enabled && self.enable_autonomous_loop
    }

    pub fn validate(&self) -> Result<(), String> {
        self.autonomy_schedule.validate()
    }
}

/// Method lists consulted by the policy evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionPolicy {
    pub deny: Vec<String>,
    pub require_approval: Vec<String>,
    pub allow_auto_apply: Vec<String>,
}

/// When the autonomous loop fires for a space, in the space's time zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutonomySchedule {
    pub daily_enabled: bool,
    pub weekly_enabled: bool,
    pub monthly_enabled: bool,
    pub weekly_review_enabled: bool,
    /// Local hour, 0-23.
    pub hour: u32,
    /// Day of week for weekly runs, 0 = Sunday.
    pub weekday: u32,
    /// Day of month for monthly runs, clamped to the month's last day.
    pub day_of_month: u32,
    pub timezone: String,
    pub last_daily_run: Option<DateTime<Utc>>,
    pub last_weekly_run: Option<DateTime<Utc>>,
    pub last_monthly_run: Option<DateTime<Utc>>,
    pub last_weekly_review_run: Option<DateTime<Utc>>,
}

impl Default for AutonomySchedule {
    fn default() -> Self {
        Self {
            daily_enabled: false,
            weekly_enabled: false,
            monthly_enabled: false,
            weekly_review_enabled: false,
            hour: 8,
            weekday: 1,
            day_of_month: 1,
            timezone: "UTC".to_string(),
            last_daily_run: None,
            last_weekly_run: None,
            last_monthly_run: None,
            last_weekly_review_run: None,
        }
    }
}

impl AutonomySchedule {
    pub fn validate(&self) -> Result<(), String> {
        if self.hour > 23 {
            return Err(format!("autonomySchedule.hour must be 0-23, got {}", self.hour));
        }
        if self.weekday > 6 {
            return Err(format!(
                "autonomySchedule.weekday must be 0-6, got {}",
                self.weekday
            ));
        }
        if !(1..=31).contains(&self.day_of_month) {
            return Err(format!(
                "autonomySchedule.dayOfMonth must be 1-31, got {}",
                self.day_of_month
            ));
        }
        Ok(())
    }

    pub fn cadence_enabled(&self, cadence: Cadence) -> bool {
        match cadence {
            Cadence::Daily => self.daily_enabled,
            Cadence::Weekly => self.weekly_enabled,
            Cadence::Monthly => self.monthly_enabled,
        }
    }

    pub fn last_run(&self, cadence: Cadence) -> Option<DateTime<Utc>> {
        match cadence {
            Cadence::Daily => self.last_daily_run,
            Cadence::Weekly => self.last_weekly_run,
            Cadence::Monthly => self.last_monthly_run,
        }
    }
}

/// A last-run marker to persist after a scheduled firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMarker {
    Cadence(Cadence),
    WeeklyReview,
}

impl RunMarker {
    fn field(&self) -> &'static str {
        match self {
            RunMarker::Cadence(Cadence::Daily) => "lastDailyRun",
            RunMarker::Cadence(Cadence::Weekly) => "lastWeeklyRun",
            RunMarker::Cadence(Cadence::Monthly) => "lastMonthlyRun",
            RunMarker::WeeklyReview => "lastWeeklyReviewRun",
        }
    }
}

/// Recursively merge `patch` into `base`. Objects merge key by key, any other
/// value replaces what was there.
pub fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Loads, resolves, and updates agent settings.
pub struct SettingsService {
    workspaces: WorkspaceRepository,
}

impl SettingsService {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            workspaces: WorkspaceRepository::new(db),
        }
    }

    /// Effective settings for a workspace or one of its spaces.
    ///
    /// A stored document that no longer deserializes falls back to defaults.
    pub fn resolve(
        &self,
        workspace_id: Uuid,
        space_id: Option<Uuid>,
    ) -> Result<AgentSettings, FolioError> {
        let merged = self.merged_document(workspace_id, space_id)?;
        match serde_json::from_value::<AgentSettings>(merged) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, "Stored agent settings are invalid, using defaults");
                Ok(AgentSettings::default())
            }
        }
    }

    /// Apply a partial update at workspace or space scope and return the
    /// effective settings of that scope.
    pub fn update(
        &self,
        workspace_id: Uuid,
        space_id: Option<Uuid>,
        patch: &Value,
    ) -> Result<AgentSettings, AgentError> {
        if !patch.is_object() {
            return Err(AgentError::Validation(
                "settings update must be a JSON object".to_string(),
            ));
        }

        let mut scoped = self
            .workspaces
            .get_settings(workspace_id, space_id)?
            .unwrap_or_else(|| Value::Object(Default::default()));
        merge_json(&mut scoped, patch);

        let mut effective = match space_id {
            Some(_) => self
                .workspaces
                .get_settings(workspace_id, None)?
                .unwrap_or_else(|| Value::Object(Default::default())),
            None => Value::Object(Default::default()),
        };
        merge_json(&mut effective, &scoped);

        let settings: AgentSettings = serde_json::from_value(effective)
            .map_err(|e| AgentError::Validation(e.to_string()))?;
        settings.validate().map_err(AgentError::Validation)?;

        self.workspaces.put_settings(workspace_id, space_id, &scoped)?;
        Ok(settings)
    }

    /// Persist last-run timestamps in the space override.
    pub fn record_runs(
        &self,
        workspace_id: Uuid,
        space_id: Uuid,
        markers: &[RunMarker],
        at: DateTime<Utc>,
    ) -> Result<(), FolioError> {
        if markers.is_empty() {
            return Ok(());
        }
        let mut schedule = serde_json::Map::new();
        for marker in markers {
            schedule.insert(marker.field().to_string(), serde_json::to_value(at)?);
        }
        let patch = serde_json::json!({ "autonomySchedule": schedule });

        let mut scoped = self
            .workspaces
            .get_settings(workspace_id, Some(space_id))?
            .unwrap_or_else(|| Value::Object(Default::default()));
        merge_json(&mut scoped, &patch);
        self.workspaces.put_settings(workspace_id, Some(space_id), &scoped)
    }

    fn merged_document(
        &self,
        workspace_id: Uuid,
        space_id: Option<Uuid>,
    ) -> Result<Value, FolioError> {
        let mut merged = self
            .workspaces
            .get_settings(workspace_id, None)?
            .unwrap_or_else(|| Value::Object(Default::default()));
        if let Some(space_id) = space_id {
            if let Some(space_doc) = self.workspaces.get_settings(workspace_id, Some(space_id))? {
                merge_json(&mut merged, &space_doc);
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn make_service() -> (SettingsService, Uuid, Uuid) {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = WorkspaceRepository::new(Arc::clone(&db));
        let ws = repo.create_workspace("Acme", None).unwrap();
        let space = repo.create_space(ws.id, "Main").unwrap();
        (SettingsService::new(db), ws.id, space.id)
    }

    #[test]
    fn test_defaults_when_nothing_stored() {
        let (service, ws, space) = make_service();
        let settings = service.resolve(ws, Some(space)).unwrap();
        assert_eq!(settings, AgentSettings::default());
        assert!(!settings.loop_enabled());
        assert!(settings.allows_writes(PermissionKey::Tasks));
    }

    #[test]
    fn test_space_override_wins() {
        let (service, ws, space) = make_service();
        service
            .update(
                ws,
                None,
                &json!({"enabled": true, "policy": {"deny": ["task.delete"]}}),
            )
            .unwrap();
        service
            .update(ws, Some(space), &json!({"policy": {"requireApproval": ["page.create"]}}))
            .unwrap();

        let ws_settings = service.resolve(ws, None).unwrap();
        assert!(ws_settings.policy.require_approval.is_empty());

        let space_settings = service.resolve(ws, Some(space)).unwrap();
        assert!(space_settings.enabled);
        assert_eq!(space_settings.policy.deny, vec!["task.delete"]);
        assert_eq!(space_settings.policy.require_approval, vec!["page.create"]);
    }

    #[test]
    fn test_update_rejects_invalid_schedule() {
        let (service, ws, _) = make_service();
        let err = service
            .update(ws, None, &json!({"autonomySchedule": {"hour": 24}}))
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        let err = service.update(ws, None, &json!({"enabled": "yes"})).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        // Nothing was persisted.
        assert_eq!(service.resolve(ws, None).unwrap(), AgentSettings::default());
    }

    #[test]
    fn test_record_runs_only_touches_given_markers() {
        let (service, ws, space) = make_service();
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap();
        service
            .record_runs(ws, space, &[RunMarker::Cadence(Cadence::Daily)], at)
            .unwrap();

        let schedule = service.resolve(ws, Some(space)).unwrap().autonomy_schedule;
        assert_eq!(schedule.last_daily_run, Some(at));
        assert_eq!(schedule.last_weekly_run, None);
        assert_eq!(schedule.last_run(Cadence::Daily), Some(at));
    }

    #[test]
    fn test_merge_json_replaces_arrays() {
        let mut base = json!({"policy": {"deny": ["a", "b"], "requireApproval": ["c"]}});
        merge_json(&mut base, &json!({"policy": {"deny": ["z"]}}));
        assert_eq!(base, json!({"policy": {"deny": ["z"], "requireApproval": ["c"]}}));
    }
}
