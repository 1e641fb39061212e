//! Facade over the agent pipeline used by the HTTP layer and the binary.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use folio_core::config::AgentConfig;
use folio_core::events::{DomainEvent, EventSink};
use folio_core::types::{local_date, parse_timezone, Cadence, Timestamp};
use folio_core::RuntimeOptions;
use folio_storage::{Database, ReviewPrompt, ReviewPromptRepository, WorkspaceRepository};

use crate::approval::ApprovalLedger;
use crate::assistant::{Assistant, ChatReply, HandoffBrief, Suggestion};
use crate::cascade::{CascadeOutcome, PlanRecord, PlanStatus, PlanningCascade};
use crate::context::ContextGatherer;
use crate::dispatch::{ActionDispatcher, DispatchContext, RpcRequest};
use crate::error::{AgentError, ApprovalError};
use crate::executor::{ActionExecutor, ExecutorOptions};
use crate::llm::{LanguageModel, OpenAiChatModel};
use crate::orchestrator::{AgentLoop, LoopOutcome};
use crate::plan::PlanProposal;
use crate::schedule::{CadenceScheduler, ScheduledRun, TickReport};
use crate::settings::{AgentSettings, SettingsService};
use crate::types::{ActionResult, ActorContext};

/// Build the configured language model, if generation is allowed at all.
pub fn configured_model(config: &AgentConfig, options: &RuntimeOptions) -> Option<Arc<dyn LanguageModel>> {
    if !options.llm_api_key_present || options.agent_model.trim().is_empty() {
        return None;
    }
    match OpenAiChatModel::from_config(config)? {
        Ok(model) => Some(Arc::new(model) as Arc<dyn LanguageModel>),
        Err(e) => {
            warn!(error = %e, "Failed to build language model client, generation disabled");
            None
        }
    }
}

/// Every agent operation, scoped by the caller's [`ActorContext`].
pub struct AgentService {
    settings: SettingsService,
    workspaces: WorkspaceRepository,
    reviews: ReviewPromptRepository,
    ledger: Arc<dyn ApprovalLedger>,
    dispatcher: Arc<dyn ActionDispatcher>,
    agent_loop: Arc<AgentLoop>,
    cascade: PlanningCascade,
    assistant: Assistant,
    scheduler: CadenceScheduler,
    events: Arc<dyn EventSink>,
}

impl AgentService {
    /// `model` is ignored unless `options` say a key and model are present.
    pub fn new(
        db: Arc<Database>,
        config: &AgentConfig,
        options: &RuntimeOptions,
        ledger: Arc<dyn ApprovalLedger>,
        dispatcher: Arc<dyn ActionDispatcher>,
        model: Option<Arc<dyn LanguageModel>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let model = model.filter(|_| options.llm_api_key_present && !options.agent_model.trim().is_empty());
        let gatherer = || ContextGatherer::new(Arc::clone(&db), config.context.clone());

        let executor = Arc::new(ActionExecutor::new(
            Arc::clone(&db),
            Arc::clone(&ledger),
            Arc::clone(&dispatcher),
            Arc::clone(&events),
            ExecutorOptions::from(config),
        ));
        let agent_loop = Arc::new(AgentLoop::new(
            Arc::clone(&db),
            gatherer(),
            model.clone(),
            Arc::clone(&executor),
            Arc::clone(&events),
            config.fallback_summary_chars,
        ));

        Self {
            settings: SettingsService::new(Arc::clone(&db)),
            workspaces: WorkspaceRepository::new(Arc::clone(&db)),
            reviews: ReviewPromptRepository::new(Arc::clone(&db)),
            cascade: PlanningCascade::new(Arc::clone(&db), gatherer(), model.clone(), Arc::clone(&events)),
            assistant: Assistant::new(Arc::clone(&db), gatherer(), model),
            scheduler: CadenceScheduler::new(
                Arc::clone(&db),
                Arc::clone(&agent_loop),
                executor,
                Arc::clone(&events),
            ),
            ledger,
            dispatcher,
            agent_loop,
            events,
        }
    }

    pub fn generation_available(&self) -> bool {
        self.agent_loop.has_model()
    }

    // -- settings --------------------------------------------------------

    pub fn settings(&self, workspace_id: Uuid, space_id: Option<Uuid>) -> Result<AgentSettings, AgentError> {
        Ok(self.settings.resolve(workspace_id, space_id)?)
    }

    pub fn update_settings(
        &self,
        workspace_id: Uuid,
        space_id: Option<Uuid>,
        patch: &Value,
    ) -> Result<AgentSettings, AgentError> {
        let settings = self.settings.update(workspace_id, space_id, patch)?;
        info!(workspace_id = %workspace_id, space_id = ?space_id, "Agent settings updated");
        Ok(settings)
    }

    fn enabled_settings(&self, actor: &ActorContext) -> Result<AgentSettings, AgentError> {
        let settings = self.settings.resolve(actor.workspace_id, Some(actor.space_id))?;
        if !settings.enabled {
            return Err(AgentError::Disabled);
        }
        Ok(settings)
    }

    fn planner_settings(&self, actor: &ActorContext) -> Result<AgentSettings, AgentError> {
        let settings = self.enabled_settings(actor)?;
        if !settings.enable_planner {
            return Err(AgentError::FeatureDisabled("planner"));
        }
        Ok(settings)
    }

    fn today(settings: &AgentSettings, now: DateTime<Utc>) -> NaiveDate {
        local_date(now, parse_timezone(&settings.autonomy_schedule.timezone))
    }

    // -- planning --------------------------------------------------------

    pub async fn propose_plan(&self, actor: &ActorContext) -> Result<PlanProposal, AgentError> {
        let settings = self.planner_settings(actor)?;
        self.agent_loop
            .propose_plan(actor, Self::today(&settings, Utc::now()))
            .await
    }

    pub async fn run_cascade(&self, actor: &ActorContext, force: bool) -> Result<CascadeOutcome, AgentError> {
        let settings = self.planner_settings(actor)?;
        self.cascade.run(actor, &settings, force, Utc::now()).await
    }

    pub fn approve_plan(&self, actor: &ActorContext, plan_id: Uuid) -> Result<PlanRecord, AgentError> {
        self.transition_plan(actor, plan_id, PlanStatus::Active, None)
    }

    pub fn reject_plan(
        &self,
        actor: &ActorContext,
        plan_id: Uuid,
        reason: Option<&str>,
    ) -> Result<PlanRecord, AgentError> {
        self.transition_plan(actor, plan_id, PlanStatus::Rejected, reason)
    }

    fn transition_plan(
        &self,
        actor: &ActorContext,
        plan_id: Uuid,
        next: PlanStatus,
        reason: Option<&str>,
    ) -> Result<PlanRecord, AgentError> {
        let (plan, from) = self
            .cascade
            .store()
            .transition(actor.workspace_id, plan_id, next, reason)?;
        info!(plan_id = %plan_id, from = from.as_str(), to = next.as_str(), "Plan status changed");
        self.events.publish(DomainEvent::PlanStatusChanged {
            workspace_id: actor.workspace_id,
            plan_id,
            from: from.as_str().to_string(),
            to: next.as_str().to_string(),
            timestamp: Timestamp::now(),
        });
        Ok(plan)
    }

    /// Cascade pass for every planner-enabled space, acting as the owner.
    pub async fn planning_tick(&self, now: DateTime<Utc>) -> Result<usize, AgentError> {
        let mut regenerated = 0;
        for workspace in self.workspaces.list_workspaces()? {
            let Some(owner) = workspace.owner_id else {
                continue;
            };
            for space in self.workspaces.list_active_spaces(workspace.id)? {
                let actor = ActorContext {
                    workspace_id: workspace.id,
                    space_id: space.id,
                    user_id: owner,
                };
                let settings = match self.planner_settings(&actor) {
                    Ok(settings) => settings,
                    Err(_) => continue,
                };
                match self.cascade.run(&actor, &settings, false, now).await {
                    Ok(outcome) => regenerated += outcome.regenerated().count(),
                    Err(e) => warn!(space_id = %space.id, error = %e, "Planning cascade failed"),
                }
            }
        }
        Ok(regenerated)
    }

    // -- loop and schedule -----------------------------------------------

    pub async fn run_loop(&self, actor: &ActorContext) -> Result<LoopOutcome, AgentError> {
        let settings = self.settings.resolve(actor.workspace_id, Some(actor.space_id))?;
        self.agent_loop.run_loop(actor, &settings, Utc::now()).await
    }

    /// Fire one cadence now, recording it like the hourly tick would.
    pub async fn schedule_run(&self, actor: &ActorContext, cadence: Cadence) -> Result<ScheduledRun, AgentError> {
        let settings = self.enabled_settings(actor)?;
        self.scheduler
            .fire(actor, &settings, &[cadence], false, Utc::now())
            .await
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, AgentError> {
        self.scheduler.tick(now).await
    }

    // -- approvals -------------------------------------------------------

    /// Redeem a token and apply the action it holds.
    pub async fn confirm_approval(&self, actor: &ActorContext, token: &str) -> Result<ActionResult, AgentError> {
        let record = self
            .ledger
            .redeem(token.trim())?
            .filter(|r| r.workspace_id == actor.workspace_id)
            .ok_or(ApprovalError::InvalidToken)?;

        let approved_actor = ActorContext {
            space_id: record.space_id.unwrap_or(actor.space_id),
            ..*actor
        };
        let ctx = DispatchContext::approved(approved_actor);
        let response = self
            .dispatcher
            .dispatch(&ctx, RpcRequest::new(&record.method, record.params.clone(), 1))
            .await;

        let result = match response.into_result() {
            Ok(value) => ActionResult::executed(&record.method, 1, value),
            Err(error) => ActionResult::failed(&record.method, 1, error.message),
        };
        info!(
            workspace_id = %actor.workspace_id,
            method = %record.method,
            phase = result.phase.as_str(),
            "Approved action applied"
        );
        self.events.publish(DomainEvent::ActionExecuted {
            workspace_id: approved_actor.workspace_id,
            space_id: approved_actor.space_id,
            user_id: approved_actor.user_id,
            method: result.method.clone(),
            phase: result.phase.as_str().to_string(),
            status: result.status.clone(),
            attempts: result.attempts,
            error: result.error.clone(),
            timestamp: Timestamp::now(),
        });
        Ok(result)
    }

    // -- review prompts --------------------------------------------------

    pub fn list_review_prompts(
        &self,
        actor: &ActorContext,
        week_key: Option<&str>,
    ) -> Result<Vec<ReviewPrompt>, AgentError> {
        let prompts = self.reviews.list_pending(actor.space_id, week_key)?;
        Ok(prompts
            .into_iter()
            .filter(|p| p.workspace_id == actor.workspace_id)
            .collect())
    }

    pub fn consume_review_prompts(&self, actor: &ActorContext, ids: &[Uuid]) -> Result<usize, AgentError> {
        Ok(self.reviews.consume(actor.space_id, ids)?)
    }

    // -- assistant -------------------------------------------------------

    pub async fn chat(&self, actor: &ActorContext, message: &str) -> Result<ChatReply, AgentError> {
        let settings = self.settings.resolve(actor.workspace_id, Some(actor.space_id))?;
        let today = Self::today(&settings, Utc::now());
        self.assistant.chat(actor, &settings, message, today).await
    }

    pub fn handoff(&self, actor: &ActorContext, note: Option<&str>) -> Result<HandoffBrief, AgentError> {
        let settings = self.enabled_settings(actor)?;
        self.assistant
            .handoff(actor, note, Self::today(&settings, Utc::now()))
    }

    pub fn suggestions(&self, actor: &ActorContext) -> Result<Vec<Suggestion>, AgentError> {
        let settings = self.settings.resolve(actor.workspace_id, Some(actor.space_id))?;
        self.assistant
            .suggestions(actor, &settings, Self::today(&settings, Utc::now()))
    }
}
