//! Planning cascade across four horizons.
//!
//! Horizons are regenerated top-down (long, mid, short, daily). A horizon is
//! regenerated when its latest plan is older than its window, when the horizon
//! above it was regenerated in the same pass, or when forced. Plans are stored
//! as tagged memory entries and never deleted; each new plan links to the one
//! it supersedes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use folio_core::events::{DomainEvent, EventSink};
use folio_core::types::{local_date, parse_timezone, Timestamp};
use folio_storage::{Database, MemoryEntry, MemoryRepository};

use crate::context::{ContextGatherer, PlanningContext};
use crate::diff::{diff_plans, PlanDiff};
use crate::error::{AgentError, PlanError};
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel};
use crate::settings::AgentSettings;
use crate::types::ActorContext;

pub const PLAN_SOURCE: &str = "agent-plan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    Long,
    Mid,
    Short,
    Daily,
}

impl Horizon {
    /// Generation order, upstream first.
    pub const CASCADE: [Horizon; 4] = [Horizon::Long, Horizon::Mid, Horizon::Short, Horizon::Daily];

    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::Long => "long",
            Horizon::Mid => "mid",
            Horizon::Short => "short",
            Horizon::Daily => "daily",
        }
    }

    /// Freshness window.
    pub fn window(&self) -> Duration {
        match self {
            Horizon::Long => Duration::days(90),
            Horizon::Mid => Duration::days(30),
            Horizon::Short => Duration::days(7),
            Horizon::Daily => Duration::days(1),
        }
    }

    /// Long and mid plans wait for a human; short and daily apply at once.
    pub fn initial_status(&self) -> PlanStatus {
        match self {
            Horizon::Long | Horizon::Mid => PlanStatus::Pending,
            Horizon::Short | Horizon::Daily => PlanStatus::Active,
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            Horizon::Long => "the next quarter",
            Horizon::Mid => "the next month",
            Horizon::Short => "the next week",
            Horizon::Daily => "today",
        }
    }

    fn tag(&self) -> String {
        format!("horizon:{}", self.as_str())
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Horizon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Horizon::CASCADE
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| format!("Unknown horizon: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Active,
    Rejected,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Active => "active",
            PlanStatus::Rejected => "rejected",
        }
    }

    /// Only pending plans move, and only to active or rejected.
    pub fn can_transition_to(&self, next: PlanStatus) -> bool {
        matches!(
            (self, next),
            (PlanStatus::Pending, PlanStatus::Active) | (PlanStatus::Pending, PlanStatus::Rejected)
        )
    }

    fn tag(&self) -> String {
        format!("status:{}", self.as_str())
    }
}

/// A stored horizon plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRecord {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub space_id: Uuid,
    pub horizon: Horizon,
    pub status: PlanStatus,
    pub text: String,
    pub change_summary: String,
    pub change_metrics: PlanDiff,
    pub previous_plan_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanMetadata {
    horizon: Horizon,
    status: PlanStatus,
    #[serde(default)]
    change_summary: String,
    change_metrics: PlanDiff,
    #[serde(default)]
    previous_plan_id: Option<Uuid>,
    #[serde(default)]
    rejection_reason: Option<String>,
}

impl PlanRecord {
    fn from_memory(entry: MemoryEntry) -> Result<Self, PlanError> {
        let space_id = entry
            .space_id
            .ok_or_else(|| PlanError::Malformed(format!("plan {} has no space", entry.id)))?;
        let meta: PlanMetadata = serde_json::from_value(entry.metadata)
            .map_err(|e| PlanError::Malformed(format!("plan {}: {}", entry.id, e)))?;
        Ok(Self {
            id: entry.id,
            workspace_id: entry.workspace_id,
            space_id,
            horizon: meta.horizon,
            status: meta.status,
            text: entry.content,
            change_summary: meta.change_summary,
            change_metrics: meta.change_metrics,
            previous_plan_id: meta.previous_plan_id,
            rejection_reason: meta.rejection_reason,
            created_at: entry.created_at,
        })
    }

    fn tags(&self) -> Vec<String> {
        vec![PLAN_SOURCE.to_string(), self.horizon.tag(), self.status.tag()]
    }

    fn metadata(&self) -> serde_json::Value {
        let mut metadata = json!({
            "horizon": self.horizon,
            "status": self.status,
            "changeSummary": self.change_summary,
            "changeMetrics": self.change_metrics,
            "previousPlanId": self.previous_plan_id,
        });
        if let Some(reason) = &self.rejection_reason {
            metadata["rejectionReason"] = json!(reason);
        }
        metadata
    }
}

/// Plan persistence over the memory store.
pub struct PlanStore {
    memories: MemoryRepository,
}

impl PlanStore {
    /// How far back to look for the latest usable plan of a horizon.
    const LOOKBACK: usize = 50;

    pub fn new(db: Arc<Database>) -> Self {
        Self {
            memories: MemoryRepository::new(db),
        }
    }

    pub fn save(&self, plan: &PlanRecord) -> Result<(), PlanError> {
        let mut entry = MemoryEntry::new(plan.workspace_id, Some(plan.space_id), PLAN_SOURCE, &plan.text)
            .with_tags(plan.tags())
            .with_metadata(plan.metadata());
        entry.id = plan.id;
        entry.created_at = plan.created_at;
        self.memories.insert(&entry)?;
        Ok(())
    }

    pub fn find(&self, id: Uuid) -> Result<Option<PlanRecord>, PlanError> {
        match self.memories.find(id)? {
            Some(entry) if entry.source == PLAN_SOURCE => PlanRecord::from_memory(entry).map(Some),
            _ => Ok(None),
        }
    }

    /// Newest plan of a horizon that was not rejected.
    pub fn latest(
        &self,
        workspace_id: Uuid,
        space_id: Uuid,
        horizon: Horizon,
    ) -> Result<Option<PlanRecord>, PlanError> {
        let entries = self
            .memories
            .with_tag(workspace_id, space_id, &horizon.tag(), Self::LOOKBACK)?;
        for entry in entries.into_iter().filter(|e| e.source == PLAN_SOURCE) {
            match PlanRecord::from_memory(entry) {
                Ok(plan) if plan.status != PlanStatus::Rejected => return Ok(Some(plan)),
                Ok(_) => continue,
                Err(e) => warn!(error = %e, "Skipping malformed plan"),
            }
        }
        Ok(None)
    }

    /// Latest plan per horizon, in cascade order.
    pub fn current(&self, workspace_id: Uuid, space_id: Uuid) -> Result<Vec<PlanRecord>, PlanError> {
        let mut plans = Vec::new();
        for horizon in Horizon::CASCADE {
            if let Some(plan) = self.latest(workspace_id, space_id, horizon)? {
                plans.push(plan);
            }
        }
        Ok(plans)
    }

    /// Move a plan of `workspace_id` to `next`.
    pub fn transition(
        &self,
        workspace_id: Uuid,
        plan_id: Uuid,
        next: PlanStatus,
        reason: Option<&str>,
    ) -> Result<(PlanRecord, PlanStatus), AgentError> {
        let mut plan = self
            .find(plan_id)?
            .filter(|p| p.workspace_id == workspace_id)
            .ok_or_else(|| AgentError::NotFound(format!("plan {}", plan_id)))?;
        let previous = plan.status;
        if !previous.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: previous.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        plan.status = next;
        if next == PlanStatus::Rejected {
            plan.rejection_reason = reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string);
        }
        self.memories
            .update_tags_and_metadata(plan.id, &plan.tags(), &plan.metadata())?;
        Ok((plan, previous))
    }
}

/// What happened to one horizon in a cascade pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizonOutcome {
    pub horizon: Horizon,
    pub regenerated: bool,
    /// `stale`, `upstream`, `forced`, `fresh`, `model-unavailable`, or `generation-failed`.
    pub reason: String,
    pub plan: Option<PlanRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CascadeOutcome {
    pub horizons: Vec<HorizonOutcome>,
}

impl CascadeOutcome {
    pub fn regenerated(&self) -> impl Iterator<Item = &HorizonOutcome> {
        self.horizons.iter().filter(|h| h.regenerated)
    }
}

pub struct PlanningCascade {
    store: PlanStore,
    gatherer: ContextGatherer,
    model: Option<Arc<dyn LanguageModel>>,
    events: Arc<dyn EventSink>,
}

impl PlanningCascade {
    pub fn new(
        db: Arc<Database>,
        gatherer: ContextGatherer,
        model: Option<Arc<dyn LanguageModel>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store: PlanStore::new(db),
            gatherer,
            model,
            events,
        }
    }

    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    /// Run one pass over all horizons.
    pub async fn run(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<CascadeOutcome, AgentError> {
        let today = local_date(now, parse_timezone(&settings.autonomy_schedule.timezone));
        let context = self.gatherer.gather(actor, today)?;

        let mut outcome = CascadeOutcome::default();
        let mut upstream: Option<PlanRecord> = None;
        let mut upstream_regenerated = false;

        for horizon in Horizon::CASCADE {
            let previous = self
                .store
                .latest(actor.workspace_id, actor.space_id, horizon)?;
            let stale = previous
                .as_ref()
                .is_none_or(|p| now - p.created_at.to_datetime() >= horizon.window());

            let reason = if force {
                "forced"
            } else if stale {
                "stale"
            } else if upstream_regenerated {
                "upstream"
            } else {
                "fresh"
            };

            if reason == "fresh" {
                upstream_regenerated = false;
                upstream = previous.clone();
                outcome.horizons.push(HorizonOutcome {
                    horizon,
                    regenerated: false,
                    reason: reason.to_string(),
                    plan: previous,
                });
                continue;
            }

            let Some(model) = self.model.as_ref() else {
                upstream_regenerated = false;
                upstream = previous.clone();
                outcome.horizons.push(HorizonOutcome {
                    horizon,
                    regenerated: false,
                    reason: "model-unavailable".to_string(),
                    plan: previous,
                });
                continue;
            };

            let text = match self
                .generate(model.as_ref(), horizon, &context, upstream.as_ref())
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(horizon = %horizon, error = %e, "Plan generation failed");
                    upstream_regenerated = false;
                    upstream = previous.clone();
                    outcome.horizons.push(HorizonOutcome {
                        horizon,
                        regenerated: false,
                        reason: "generation-failed".to_string(),
                        plan: previous,
                    });
                    continue;
                }
            };

            let diff = diff_plans(previous.as_ref().map(|p| p.text.as_str()), &text);
            let plan = PlanRecord {
                id: Uuid::new_v4(),
                workspace_id: actor.workspace_id,
                space_id: actor.space_id,
                horizon,
                status: horizon.initial_status(),
                text,
                change_summary: diff.summary(),
                change_metrics: diff,
                previous_plan_id: previous.as_ref().map(|p| p.id),
                rejection_reason: None,
                created_at: Timestamp::from_datetime(now),
            };
            self.store.save(&plan)?;

            info!(
                workspace_id = %actor.workspace_id,
                space_id = %actor.space_id,
                horizon = %horizon,
                significance = plan.change_metrics.significance.as_str(),
                "Plan generated"
            );
            self.events.publish(DomainEvent::PlanGenerated {
                workspace_id: actor.workspace_id,
                space_id: actor.space_id,
                plan_id: plan.id,
                horizon: horizon.as_str().to_string(),
                significance: plan.change_metrics.significance.as_str().to_string(),
                timestamp: Timestamp::now(),
            });

            upstream_regenerated = true;
            upstream = Some(plan.clone());
            outcome.horizons.push(HorizonOutcome {
                horizon,
                regenerated: true,
                reason: reason.to_string(),
                plan: Some(plan),
            });
        }

        Ok(outcome)
    }

    async fn generate(
        &self,
        model: &dyn LanguageModel,
        horizon: Horizon,
        context: &PlanningContext,
        upstream: Option<&PlanRecord>,
    ) -> Result<String, PlanError> {
        let mut prompt = format!(
            "Write a {} plan covering {}. One item per line, no preamble.\n\n{}",
            horizon,
            horizon.scope(),
            context.render()
        );
        if let Some(parent) = upstream {
            prompt.push_str(&format!(
                "\nIt must serve this {} plan:\n{}\n",
                parent.horizon, parent.text
            ));
        }
        let text = model
            .complete(CompletionRequest {
                messages: vec![
                    ChatMessage::system("You are a planning assistant for a personal workspace."),
                    ChatMessage::user(prompt),
                ],
                temperature: Some(0.3),
                ..Default::default()
            })
            .await?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use folio_core::config::ContextLimits;
    use folio_core::events::CollectingSink;

    struct Harness {
        db: Arc<Database>,
        events: Arc<CollectingSink>,
        actor: ActorContext,
    }

    fn harness() -> Harness {
        Harness {
            db: Arc::new(Database::in_memory().unwrap()),
            events: Arc::new(CollectingSink::new()),
            actor: ActorContext {
                workspace_id: Uuid::new_v4(),
                space_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
            },
        }
    }

    fn cascade(h: &Harness, model: Option<Arc<ScriptedModel>>) -> PlanningCascade {
        PlanningCascade::new(
            Arc::clone(&h.db),
            ContextGatherer::new(Arc::clone(&h.db), ContextLimits::default()),
            model.map(|m| m as Arc<dyn LanguageModel>),
            h.events.clone(),
        )
    }

    fn replies(n: usize) -> Arc<ScriptedModel> {
        Arc::new(ScriptedModel::new(
            (0..n).map(|i| Ok(format!("Plan line {}\nShared line", i))).collect(),
        ))
    }

    #[tokio::test]
    async fn test_first_pass_generates_all_horizons() {
        let h = harness();
        let model = replies(4);
        let cascade = cascade(&h, Some(model.clone()));
        let outcome = cascade
            .run(&h.actor, &AgentSettings::default(), false, Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome.regenerated().count(), 4);
        assert_eq!(model.calls(), 4);
        let statuses: Vec<_> = outcome
            .horizons
            .iter()
            .map(|o| o.plan.as_ref().unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![PlanStatus::Pending, PlanStatus::Pending, PlanStatus::Active, PlanStatus::Active]
        );
        assert!(outcome.horizons.iter().all(|o| o.reason == "stale"));
        assert_eq!(h.events.events().len(), 4);
    }

    #[tokio::test]
    async fn test_only_stale_horizon_and_downstream_regenerate() {
        let h = harness();
        let now = Utc::now();
        let cascade_a = cascade(&h, Some(replies(4)));
        cascade_a
            .run(&h.actor, &AgentSettings::default(), false, now - Duration::days(8))
            .await
            .unwrap();

        // Eight days later: short (7d) and daily (1d) are stale; long and mid are fresh.
        let model = replies(2);
        let cascade_b = cascade(&h, Some(model.clone()));
        let outcome = cascade_b
            .run(&h.actor, &AgentSettings::default(), false, now)
            .await
            .unwrap();
        let regenerated: Vec<_> = outcome.regenerated().map(|o| o.horizon).collect();
        assert_eq!(regenerated, vec![Horizon::Short, Horizon::Daily]);
        assert_eq!(model.calls(), 2);

        let daily = outcome.horizons[3].plan.as_ref().unwrap();
        assert!(daily.previous_plan_id.is_some());
        assert_ne!(daily.change_metrics.significance, crate::diff::Significance::New);
    }

    #[tokio::test]
    async fn test_upstream_regeneration_propagates() {
        let h = harness();
        let now = Utc::now();
        cascade(&h, Some(replies(4)))
            .run(&h.actor, &AgentSettings::default(), false, now - Duration::hours(2))
            .await
            .unwrap();

        // Reject the long plan: it no longer counts, so long is regenerated
        // and everything below follows even though they are fresh.
        let store = PlanStore::new(Arc::clone(&h.db));
        let long = store.latest(h.actor.workspace_id, h.actor.space_id, Horizon::Long).unwrap().unwrap();
        store
            .transition(h.actor.workspace_id, long.id, PlanStatus::Rejected, Some("off track"))
            .unwrap();

        let outcome = cascade(&h, Some(replies(4)))
            .run(&h.actor, &AgentSettings::default(), false, now)
            .await
            .unwrap();
        let reasons: Vec<_> = outcome.horizons.iter().map(|o| o.reason.as_str()).collect();
        assert_eq!(reasons, vec!["stale", "upstream", "upstream", "upstream"]);
    }

    #[tokio::test]
    async fn test_model_unavailable_skips_without_propagation() {
        let h = harness();
        let outcome = cascade(&h, None)
            .run(&h.actor, &AgentSettings::default(), false, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.regenerated().count(), 0);
        assert!(outcome.horizons.iter().all(|o| o.reason == "model-unavailable"));
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_plan_transitions() {
        let h = harness();
        let outcome = cascade(&h, Some(replies(4)))
            .run(&h.actor, &AgentSettings::default(), false, Utc::now())
            .await
            .unwrap();
        let store = PlanStore::new(Arc::clone(&h.db));
        let mid = outcome.horizons[1].plan.clone().unwrap();
        let daily = outcome.horizons[3].plan.clone().unwrap();

        let (approved, from) = store
            .transition(h.actor.workspace_id, mid.id, PlanStatus::Active, None)
            .unwrap();
        assert_eq!(from, PlanStatus::Pending);
        assert_eq!(approved.status, PlanStatus::Active);

        let err = store
            .transition(h.actor.workspace_id, mid.id, PlanStatus::Rejected, None)
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { .. }));

        let err = store
            .transition(h.actor.workspace_id, daily.id, PlanStatus::Active, None)
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { .. }));

        let err = store
            .transition(Uuid::new_v4(), mid.id, PlanStatus::Active, None)
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }
}
