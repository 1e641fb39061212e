//! Planning context: goals, memory slices, and the triage summary of a space.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use folio_core::config::ContextLimits;
use folio_core::error::FolioError;
use folio_storage::{Database, Goal, GoalRepository, MemoryEntry, MemoryRepository, Task, TaskRepository};

use crate::types::ActorContext;

pub const TAG_SHORT_TERM: &str = "short-term";
pub const TAG_TOPIC: &str = "topic";
pub const TAG_PROFILE: &str = "profile";

/// How many open tasks touch one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalFocus {
    pub goal_id: Uuid,
    pub title: String,
    pub open_tasks: usize,
}

/// Open-task counts for a space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageSummary {
    pub inbox: usize,
    pub waiting: usize,
    pub someday: usize,
    pub overdue: usize,
    pub due_today: usize,
    pub goal_focus: Vec<GoalFocus>,
}

impl TriageSummary {
    pub fn is_clear(&self) -> bool {
        self.inbox == 0 && self.waiting == 0 && self.overdue == 0 && self.due_today == 0
    }
}

/// Summarize open tasks as of `today`.
///
/// A task counts toward a goal when any goal keyword (or, without keywords,
/// the goal title) appears in the task's title or description, ignoring case.
pub fn triage(tasks: &[Task], goals: &[Goal], today: NaiveDate) -> TriageSummary {
    let open: Vec<&Task> = tasks.iter().filter(|t| t.is_open()).collect();
    let mut summary = TriageSummary::default();

    for task in &open {
        match task.bucket.as_deref() {
            Some("inbox") => summary.inbox += 1,
            Some("waiting") => summary.waiting += 1,
            Some("someday") => summary.someday += 1,
            _ => {}
        }
        match task.due_date {
            Some(due) if due < today => summary.overdue += 1,
            Some(due) if due == today => summary.due_today += 1,
            _ => {}
        }
    }

    let haystacks: Vec<String> = open
        .iter()
        .map(|t| format!("{} {}", t.title, t.description).to_lowercase())
        .collect();

    summary.goal_focus = goals
        .iter()
        .map(|goal| {
            let needles: Vec<String> = if goal.keywords.is_empty() {
                vec![goal.title.to_lowercase()]
            } else {
                goal.keywords.iter().map(|k| k.to_lowercase()).collect()
            };
            let open_tasks = haystacks
                .iter()
                .filter(|h| needles.iter().any(|n| !n.trim().is_empty() && h.contains(n.trim())))
                .count();
            GoalFocus {
                goal_id: goal.id,
                title: goal.title.clone(),
                open_tasks,
            }
        })
        .collect();

    summary
}

/// Everything the planner sees about a space.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningContext {
    pub today: NaiveDate,
    pub goals: Vec<Goal>,
    pub recent: Vec<MemoryEntry>,
    pub short_term: Vec<MemoryEntry>,
    pub topic: Vec<MemoryEntry>,
    pub profile: Vec<MemoryEntry>,
    pub triage: TriageSummary,
}

impl PlanningContext {
    /// Plain-text rendering used in prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Today: {}", self.today);

        let _ = writeln!(out, "\nGoals:");
        if self.goals.is_empty() {
            let _ = writeln!(out, "- (none)");
        }
        for goal in &self.goals {
            let _ = writeln!(out, "- [{}] {}", goal.horizon, goal.title);
        }

        let t = &self.triage;
        let _ = writeln!(
            out,
            "\nTriage: inbox={} waiting={} someday={} overdue={} due_today={}",
            t.inbox, t.waiting, t.someday, t.overdue, t.due_today
        );
        for focus in &t.goal_focus {
            let _ = writeln!(out, "- goal \"{}\": {} open tasks", focus.title, focus.open_tasks);
        }

        for (label, entries) in [
            ("Profile", &self.profile),
            ("Short-term notes", &self.short_term),
            ("Topics", &self.topic),
            ("Recent activity", &self.recent),
        ] {
            if entries.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{}:", label);
            for entry in entries {
                let _ = writeln!(out, "- {}", first_line(&entry.content, 200));
            }
        }
        out
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    line.chars().take(max_chars).collect()
}

/// Reads the planning context from storage.
pub struct ContextGatherer {
    goals: GoalRepository,
    memories: MemoryRepository,
    tasks: TaskRepository,
    limits: ContextLimits,
}

impl ContextGatherer {
    pub fn new(db: Arc<Database>, limits: ContextLimits) -> Self {
        Self {
            goals: GoalRepository::new(Arc::clone(&db)),
            memories: MemoryRepository::new(Arc::clone(&db)),
            tasks: TaskRepository::new(db),
            limits,
        }
    }

    pub fn gather(&self, actor: &ActorContext, today: NaiveDate) -> Result<PlanningContext, FolioError> {
        let (ws, space) = (actor.workspace_id, actor.space_id);
        let goals = self.goals.list_active(ws, space, self.limits.goals)?;
        let tasks = self.tasks.list_for_space(space)?;
        Ok(PlanningContext {
            today,
            triage: triage(&tasks, &goals, today),
            goals,
            recent: self.memories.recent(ws, space, self.limits.recent)?,
            short_term: self.memories.with_tag(ws, space, TAG_SHORT_TERM, self.limits.short_term)?,
            topic: self.memories.with_tag(ws, space, TAG_TOPIC, self.limits.topic)?,
            profile: self.memories.with_tag(ws, space, TAG_PROFILE, self.limits.profile)?,
        })
    }

    /// Triage only, for suggestions and handoffs.
    pub fn triage(&self, actor: &ActorContext, today: NaiveDate) -> Result<TriageSummary, FolioError> {
        let goals = self
            .goals
            .list_active(actor.workspace_id, actor.space_id, self.limits.goals)?;
        let tasks = self.tasks.list_for_space(actor.space_id)?;
        Ok(triage(&tasks, &goals, today))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::types::Timestamp;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn task(title: &str, bucket: Option<&str>, due: Option<NaiveDate>) -> Task {
        let mut task = Task::new(Uuid::nil(), Uuid::nil(), title);
        task.bucket = bucket.map(str::to_string);
        task.due_date = due;
        task
    }

    fn goal(title: &str, keywords: &[&str]) -> Goal {
        Goal {
            id: Uuid::new_v4(),
            workspace_id: Uuid::nil(),
            space_id: None,
            title: title.to_string(),
            horizon: "mid".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            status: "active".to_string(),
            created_at: Timestamp::now(),
        }
    }

    #[test]
    fn test_triage_counts() {
        let yesterday = today().pred_opt();
        let mut done = task("Finished", Some("inbox"), yesterday);
        done.status = "done".into();
        let tasks = vec![
            task("Sort mail", Some("inbox"), None),
            task("Call vendor", Some("waiting"), yesterday),
            task("Learn piano", Some("someday"), None),
            task("Pay rent", None, Some(today())),
            done,
        ];
        let summary = triage(&tasks, &[], today());
        assert_eq!(summary.inbox, 1);
        assert_eq!(summary.waiting, 1);
        assert_eq!(summary.someday, 1);
        assert_eq!(summary.overdue, 1);
        assert_eq!(summary.due_today, 1);
        assert!(!summary.is_clear());
    }

    #[test]
    fn test_goal_focus_by_keyword() {
        let tasks = vec![
            task("Draft LAUNCH email", None, None),
            task("Launch checklist", None, None),
            task("Dentist", None, None),
        ];
        let goals = vec![goal("Ship v2", &["launch"]), goal("Health", &[])];
        let summary = triage(&tasks, &goals, today());
        assert_eq!(summary.goal_focus[0].open_tasks, 2);
        assert_eq!(summary.goal_focus[1].open_tasks, 0);
    }

    #[test]
    fn test_empty_space_is_clear() {
        assert!(triage(&[], &[], today()).is_clear());
    }

    #[test]
    fn test_gather_reads_memory_slices() {
        let db = Arc::new(Database::in_memory().unwrap());
        let actor = ActorContext {
            workspace_id: Uuid::new_v4(),
            space_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        let memories = MemoryRepository::new(Arc::clone(&db));
        memories
            .insert(
                &MemoryEntry::new(actor.workspace_id, Some(actor.space_id), "user", "Prefers mornings")
                    .with_tags([TAG_PROFILE]),
            )
            .unwrap();

        let gatherer = ContextGatherer::new(db, ContextLimits::default());
        let context = gatherer.gather(&actor, today()).unwrap();
        assert_eq!(context.profile.len(), 1);
        assert_eq!(context.recent.len(), 1);
        assert!(context.short_term.is_empty());
        assert!(context.render().contains("Prefers mornings"));
    }
}
