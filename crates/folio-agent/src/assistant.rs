//! Conversational helpers: chat, handoff briefs, and proactive suggestions.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use folio_core::types::Timestamp;
use folio_storage::{Database, MemoryEntry, MemoryRepository};

use crate::audit::AUDIT_SOURCE;
use crate::cascade::{PlanRecord, PlanStore};
use crate::context::{ContextGatherer, TriageSummary};
use crate::error::AgentError;
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel};
use crate::settings::AgentSettings;
use crate::types::ActorContext;

/// Maximum chat message length in characters.
const MAX_MESSAGE_LENGTH: usize = 2000;

pub const HANDOFF_SOURCE: &str = "handoff";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    /// False when the reply is the canned fallback.
    pub generated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffBrief {
    pub id: Uuid,
    pub content: String,
    pub triage: TriageSummary,
    pub plan_ids: Vec<Uuid>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub kind: String,
    pub message: String,
}

impl Suggestion {
    fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

pub struct Assistant {
    gatherer: ContextGatherer,
    model: Option<Arc<dyn LanguageModel>>,
    memories: MemoryRepository,
    plans: PlanStore,
}

impl Assistant {
    pub fn new(
        db: Arc<Database>,
        gatherer: ContextGatherer,
        model: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        Self {
            gatherer,
            model,
            memories: MemoryRepository::new(Arc::clone(&db)),
            plans: PlanStore::new(db),
        }
    }

    pub async fn chat(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        message: &str,
        today: NaiveDate,
    ) -> Result<ChatReply, AgentError> {
        if !settings.enabled {
            return Err(AgentError::Disabled);
        }
        let message = message.trim();
        if message.is_empty() {
            return Err(AgentError::Validation("message is empty".to_string()));
        }
        if message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(AgentError::Validation(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }

        let context = self.gatherer.gather(actor, today)?;
        let fallback = || ChatReply {
            reply: format!(
                "The assistant model is unavailable right now. {}",
                triage_line(&context.triage)
            ),
            generated: false,
        };

        let Some(model) = self.model.as_ref() else {
            return Ok(fallback());
        };
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(format!(
                    "You are a concise assistant for a personal workspace. Ground answers in this context.\n\n{}",
                    context.render()
                )),
                ChatMessage::user(message),
            ],
            temperature: Some(0.5),
            ..Default::default()
        };
        match model.complete(request).await {
            Ok(reply) => Ok(ChatReply {
                reply: reply.trim().to_string(),
                generated: true,
            }),
            Err(e) => {
                warn!(space_id = %actor.space_id, error = %e, "Chat completion failed");
                Ok(fallback())
            }
        }
    }

    /// Build a handoff brief and keep it as a memory entry.
    pub fn handoff(
        &self,
        actor: &ActorContext,
        note: Option<&str>,
        today: NaiveDate,
    ) -> Result<HandoffBrief, AgentError> {
        let triage = self.gatherer.triage(actor, today)?;
        let plans = self.plans.current(actor.workspace_id, actor.space_id)?;
        let last_loop = self
            .memories
            .by_source(actor.workspace_id, actor.space_id, AUDIT_SOURCE, 50)?
            .into_iter()
            .find(|m| m.has_tag("loop_completed"));

        let content = render_handoff(today, &triage, &plans, last_loop.as_ref(), note);
        let entry = MemoryEntry::new(actor.workspace_id, Some(actor.space_id), HANDOFF_SOURCE, &content)
            .with_tags([HANDOFF_SOURCE])
            .with_metadata(json!({ "triage": triage, "userId": actor.user_id }));
        self.memories.insert(&entry)?;

        info!(space_id = %actor.space_id, plans = plans.len(), "Handoff recorded");
        Ok(HandoffBrief {
            id: entry.id,
            content,
            triage,
            plan_ids: plans.iter().map(|p| p.id).collect(),
            created_at: entry.created_at,
        })
    }

    pub fn suggestions(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        today: NaiveDate,
    ) -> Result<Vec<Suggestion>, AgentError> {
        if !settings.enabled {
            return Err(AgentError::Disabled);
        }
        if !settings.enable_triage {
            return Err(AgentError::FeatureDisabled("triage"));
        }
        let triage = self.gatherer.triage(actor, today)?;
        Ok(suggest(&triage, settings.enable_proactive_questions))
    }
}

fn triage_line(t: &TriageSummary) -> String {
    if t.is_clear() {
        return "Nothing is overdue or waiting on you.".to_string();
    }
    format!(
        "Open: {} inbox, {} waiting, {} overdue, {} due today.",
        t.inbox, t.waiting, t.overdue, t.due_today
    )
}

fn render_handoff(
    today: NaiveDate,
    triage: &TriageSummary,
    plans: &[PlanRecord],
    last_loop: Option<&MemoryEntry>,
    note: Option<&str>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Handoff for {}", today);
    let _ = writeln!(out, "{}", triage_line(triage));

    if !plans.is_empty() {
        let _ = writeln!(out, "\nPlans:");
        for plan in plans {
            let first = plan.text.lines().next().unwrap_or_default();
            let _ = writeln!(out, "- {} ({}): {}", plan.horizon, plan.status.as_str(), first);
        }
    }
    if let Some(entry) = last_loop {
        let _ = writeln!(out, "\nLast agent run: {}", entry.content.lines().next().unwrap_or_default());
    }
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        let _ = writeln!(out, "\nNote: {}", note);
    }
    out
}

/// Deterministic suggestions from triage counts.
pub fn suggest(triage: &TriageSummary, proactive_questions: bool) -> Vec<Suggestion> {
    let mut out = Vec::new();
    if triage.overdue > 0 {
        out.push(Suggestion::new(
            "overdue",
            format!("Reschedule or finish {} overdue tasks.", triage.overdue),
        ));
    }
    if triage.due_today > 0 {
        out.push(Suggestion::new(
            "due_today",
            format!("{} tasks are due today.", triage.due_today),
        ));
    }
    if triage.inbox > 0 {
        out.push(Suggestion::new(
            "inbox",
            format!("Triage {} inbox items.", triage.inbox),
        ));
    }
    if triage.waiting > 0 {
        out.push(Suggestion::new(
            "waiting",
            format!("Follow up on {} waiting tasks.", triage.waiting),
        ));
    }
    for focus in triage.goal_focus.iter().filter(|f| f.open_tasks == 0) {
        out.push(Suggestion::new(
            "goal",
            format!("Add a next step for goal \"{}\".", focus.title),
        ));
    }

    if proactive_questions {
        out.push(Suggestion::new(
            "question",
            "What one outcome would make this week a success?",
        ));
        if triage.someday > 0 {
            out.push(Suggestion::new(
                "question",
                "Is anything in someday ready to become active?",
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GoalFocus;
    use crate::llm::testing::ScriptedModel;
    use folio_core::config::ContextLimits;
    use folio_storage::{Task, TaskRepository};

    fn actor() -> ActorContext {
        ActorContext {
            workspace_id: Uuid::new_v4(),
            space_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn assistant(db: &Arc<Database>, model: Option<Arc<ScriptedModel>>) -> Assistant {
        Assistant::new(
            Arc::clone(db),
            ContextGatherer::new(Arc::clone(db), ContextLimits::default()),
            model.map(|m| m as Arc<dyn LanguageModel>),
        )
    }

    fn enabled() -> AgentSettings {
        AgentSettings {
            enabled: true,
            ..AgentSettings::default()
        }
    }

    #[test]
    fn test_suggest_from_counts() {
        let triage = TriageSummary {
            inbox: 2,
            overdue: 1,
            someday: 3,
            goal_focus: vec![GoalFocus {
                goal_id: Uuid::new_v4(),
                title: "Health".into(),
                open_tasks: 0,
            }],
            ..TriageSummary::default()
        };
        let kinds: Vec<String> = suggest(&triage, false).into_iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec!["overdue", "inbox", "goal"]);

        let with_questions = suggest(&triage, true);
        assert_eq!(with_questions.iter().filter(|s| s.kind == "question").count(), 2);
        assert!(suggest(&TriageSummary::default(), false).is_empty());
    }

    #[tokio::test]
    async fn test_chat_without_model_uses_fallback() {
        let db = Arc::new(Database::in_memory().unwrap());
        let reply = assistant(&db, None)
            .chat(&actor(), &enabled(), "What next?", today())
            .await
            .unwrap();
        assert!(!reply.generated);
        assert!(reply.reply.contains("Nothing is overdue"));
    }

    #[tokio::test]
    async fn test_chat_uses_model_and_validates() {
        let db = Arc::new(Database::in_memory().unwrap());
        let model = Arc::new(ScriptedModel::replying("  Start with the launch email. "));
        let assistant = assistant(&db, Some(model.clone()));

        let reply = assistant
            .chat(&actor(), &enabled(), "What next?", today())
            .await
            .unwrap();
        assert!(reply.generated);
        assert_eq!(reply.reply, "Start with the launch email.");

        let err = assistant
            .chat(&actor(), &enabled(), "   ", today())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));

        let err = assistant
            .chat(&actor(), &AgentSettings::default(), "hi", today())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Disabled));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_handoff_is_persisted() {
        let db = Arc::new(Database::in_memory().unwrap());
        let actor = actor();
        let mut task = Task::new(actor.workspace_id, actor.space_id, "Sort mail");
        task.bucket = Some("inbox".into());
        TaskRepository::new(Arc::clone(&db)).insert(&task).unwrap();

        let brief = assistant(&db, None)
            .handoff(&actor, Some("Back Monday"), today())
            .unwrap();
        assert_eq!(brief.triage.inbox, 1);
        assert!(brief.content.contains("Note: Back Monday"));

        let stored = MemoryRepository::new(db)
            .by_source(actor.workspace_id, actor.space_id, HANDOFF_SOURCE, 10)
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, brief.id);
    }

    #[test]
    fn test_suggestions_respect_toggles() {
        let db = Arc::new(Database::in_memory().unwrap());
        let assistant = assistant(&db, None);
        let mut settings = enabled();
        settings.enable_triage = false;
        let err = assistant.suggestions(&actor(), &settings, today()).unwrap_err();
        assert!(matches!(err, AgentError::FeatureDisabled("triage")));
    }
}
