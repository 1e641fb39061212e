//! Autonomous loop: gather context, ask for a plan, execute it, record it.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use folio_core::events::{DomainEvent, EventSink};
use folio_core::types::{local_date, parse_timezone, week_key, Timestamp};
use folio_storage::{Database, ReviewPromptRepository};

use crate::context::{ContextGatherer, PlanningContext};
use crate::error::AgentError;
use crate::executor::ActionExecutor;
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel};
use crate::plan::{parse_plan, PlanProposal};
use crate::settings::AgentSettings;
use crate::types::{ActionMethod, ActionResult, ActorContext};

const PLANNER_PROMPT: &str = "You are the planning agent of a personal workspace. \
Reply with one JSON object: {\"summary\": string, \"actions\": [{\"method\": string, \
\"params\": object, \"rationale\": string}], \"reviewQuestions\": [string]}. \
Propose at most three actions and only use the listed methods.";

/// Result of one loop run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopOutcome {
    pub summary: String,
    pub actions: Vec<ActionResult>,
    pub review_prompts_added: usize,
}

pub struct AgentLoop {
    gatherer: ContextGatherer,
    model: Option<Arc<dyn LanguageModel>>,
    executor: Arc<ActionExecutor>,
    reviews: ReviewPromptRepository,
    events: Arc<dyn EventSink>,
    fallback_summary_chars: usize,
}

impl AgentLoop {
    pub fn new(
        db: Arc<Database>,
        gatherer: ContextGatherer,
        model: Option<Arc<dyn LanguageModel>>,
        executor: Arc<ActionExecutor>,
        events: Arc<dyn EventSink>,
        fallback_summary_chars: usize,
    ) -> Self {
        Self {
            gatherer,
            model,
            executor,
            reviews: ReviewPromptRepository::new(db),
            events,
            fallback_summary_chars,
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Ask the model for a plan without executing it.
    ///
    /// A missing model or a failed call yields [`PlanProposal::empty`].
    pub async fn propose_plan(
        &self,
        actor: &ActorContext,
        today: NaiveDate,
    ) -> Result<PlanProposal, AgentError> {
        let context = self.gatherer.gather(actor, today)?;
        Ok(self.generate(actor, &context).await)
    }

    /// One full loop run for `actor`'s space.
    pub async fn run_loop(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        now: DateTime<Utc>,
    ) -> Result<LoopOutcome, AgentError> {
        if !settings.enabled {
            return Err(AgentError::Disabled);
        }
        if !settings.enable_autonomous_loop {
            return Err(AgentError::FeatureDisabled("autonomous loop"));
        }

        let today = local_date(now, parse_timezone(&settings.autonomy_schedule.timezone));
        let plan = self.propose_plan(actor, today).await?;
        let results = self
            .executor
            .execute_all(actor, settings, &plan.actions)
            .await;

        let review_prompts_added = if plan.review_questions.is_empty() {
            0
        } else {
            self.reviews
                .insert_many(
                    actor.workspace_id,
                    actor.space_id,
                    &week_key(today),
                    &plan.review_questions,
                )
                .unwrap_or_else(|e| {
                    warn!(space_id = %actor.space_id, error = %e, "Failed to store review prompts");
                    0
                })
        };

        info!(
            workspace_id = %actor.workspace_id,
            space_id = %actor.space_id,
            proposed = plan.actions.len(),
            executed = results.len(),
            review_prompts_added,
            "Agent loop completed"
        );
        self.events.publish(DomainEvent::LoopCompleted {
            workspace_id: actor.workspace_id,
            space_id: actor.space_id,
            user_id: actor.user_id,
            summary: plan.summary.clone(),
            results: serde_json::to_value(&results).unwrap_or_default(),
            timestamp: Timestamp::now(),
        });

        Ok(LoopOutcome {
            summary: plan.summary,
            actions: results,
            review_prompts_added,
        })
    }

    async fn generate(&self, actor: &ActorContext, context: &PlanningContext) -> PlanProposal {
        let Some(model) = self.model.as_ref() else {
            return PlanProposal::empty();
        };

        let methods: Vec<&str> = ActionMethod::ALL.iter().map(|m| m.as_str()).collect();
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(PLANNER_PROMPT),
                ChatMessage::user(format!(
                    "Methods: {}\n\n{}",
                    methods.join(", "),
                    context.render()
                )),
            ],
            temperature: Some(0.2),
            json_mode: true,
            ..Default::default()
        };

        match model.complete(request).await {
            Ok(text) => parse_plan(&text, self.fallback_summary_chars),
            Err(e) => {
                warn!(space_id = %actor.space_id, error = %e, "Plan generation failed, proposing nothing");
                PlanProposal::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::InMemoryApprovalLedger;
    use crate::dispatch::InternalProcessor;
    use crate::error::LlmError;
    use crate::executor::ExecutorOptions;
    use crate::llm::testing::ScriptedModel;
    use crate::plan::NO_ACTIONS_SUMMARY;
    use crate::types::ActionPhase;
    use folio_core::config::ContextLimits;
    use folio_core::events::CollectingSink;
    use std::time::Duration;
    use uuid::Uuid;

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

    fn agent_loop(h: &Harness, model: Option<Arc<ScriptedModel>>) -> AgentLoop {
        let ledger = Arc::new(InMemoryApprovalLedger::new());
        let processor = Arc::new(InternalProcessor::new(Arc::clone(&h.db), ledger.clone(), 600));
        let executor = Arc::new(ActionExecutor::new(
            Arc::clone(&h.db),
            ledger,
            processor,
            h.events.clone(),
            ExecutorOptions {
                retry_delay: Duration::ZERO,
                ..ExecutorOptions::default()
            },
        ));
        AgentLoop::new(
            Arc::clone(&h.db),
            ContextGatherer::new(Arc::clone(&h.db), ContextLimits::default()),
            model.map(|m| m as Arc<dyn LanguageModel>),
            executor,
            h.events.clone(),
            500,
        )
    }

    fn enabled() -> AgentSettings {
        AgentSettings {
            enabled: true,
            enable_autonomous_loop: true,
            ..AgentSettings::default()
        }
    }

    #[tokio::test]
    async fn test_no_model_proposes_nothing() {
        let h = harness();
        let outcome = agent_loop(&h, None)
            .run_loop(&h.actor, &enabled(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.summary, NO_ACTIONS_SUMMARY);
        assert!(outcome.actions.is_empty());

        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), "loop_completed");
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let h = harness();
        let model = Arc::new(ScriptedModel::new(vec![Err(LlmError::Network("down".into()))]));
        let outcome = agent_loop(&h, Some(model.clone()))
            .run_loop(&h.actor, &enabled(), Utc::now())
            .await
            .unwrap();
        assert_eq!(model.calls(), 1);
        assert_eq!(outcome.summary, NO_ACTIONS_SUMMARY);
        assert!(outcome.actions.is_empty());
    }

    #[tokio::test]
    async fn test_at_most_three_actions_run() {
        let h = harness();
        let actions: Vec<String> = (0..5)
            .map(|i| format!(r#"{{"method": "task.create", "params": {{"title": "Task {}"}}}}"#, i))
            .collect();
        let reply = format!(r#"{{"summary": "Busy week", "actions": [{}]}}"#, actions.join(","));
        let model = Arc::new(ScriptedModel::replying(&reply));

        let outcome = agent_loop(&h, Some(model))
            .run_loop(&h.actor, &enabled(), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.summary, "Busy week");
        assert_eq!(outcome.actions.len(), 3);
        assert!(outcome.actions.iter().all(|r| r.phase == ActionPhase::Executed));
    }

    #[tokio::test]
    async fn test_review_questions_stored_once_per_week() {
        let h = harness();
        let reply = r#"{"summary": "Review", "actions": [], "reviewQuestions": ["What slipped?", "What went well?"]}"#;
        let model = Arc::new(ScriptedModel::new(vec![Ok(reply.into()), Ok(reply.into())]));
        let agent = agent_loop(&h, Some(model));
        let now = Utc::now();

        let first = agent.run_loop(&h.actor, &enabled(), now).await.unwrap();
        let second = agent.run_loop(&h.actor, &enabled(), now).await.unwrap();
        assert_eq!(first.review_prompts_added, 2);
        assert_eq!(second.review_prompts_added, 0);

        let pending = ReviewPromptRepository::new(Arc::clone(&h.db))
            .list_pending(h.actor.space_id, None)
            .unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_settings_are_rejected() {
        let h = harness();
        let agent = agent_loop(&h, None);

        let err = agent
            .run_loop(&h.actor, &AgentSettings::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Disabled));

        let settings = AgentSettings {
            enabled: true,
            ..AgentSettings::default()
        };
        let err = agent.run_loop(&h.actor, &settings, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AgentError::FeatureDisabled(_)));
        assert!(h.events.events().is_empty());
    }
}
