//! Typed agent actions.
//!
//! The planner emits loosely-shaped `{method, params}` pairs. [`normalize`]
//! cleans the params without ever failing, [`canonicalize_generated`] pins
//! well-known generated page titles to a stable key, and [`AgentAction::parse`]
//! turns the result into one variant of a closed sum type.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use folio_core::types::{month_key, week_key};

use crate::types::ActionMethod;

// =============================================================================
// Enumerated task fields
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    fn from_alias(value: &str) -> Option<Self> {
        match value {
            "todo" | "to do" | "to-do" | "open" | "pending" | "not_started" => Some(Self::Todo),
            "in_progress" | "in progress" | "in-progress" | "doing" | "started" | "active" => {
                Some(Self::InProgress)
            }
            "blocked" | "on_hold" | "on hold" => Some(Self::Blocked),
            "done" | "complete" | "completed" | "closed" | "finished" => Some(Self::Done),
            "cancelled" | "canceled" | "dropped" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    fn from_alias(value: &str) -> Option<Self> {
        match value {
            "low" | "minor" => Some(Self::Low),
            "medium" | "med" | "normal" => Some(Self::Medium),
            "high" | "important" => Some(Self::High),
            "urgent" | "critical" | "asap" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskBucket {
    Inbox,
    Next,
    Waiting,
    Someday,
}

impl TaskBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskBucket::Inbox => "inbox",
            TaskBucket::Next => "next",
            TaskBucket::Waiting => "waiting",
            TaskBucket::Someday => "someday",
        }
    }

    fn from_alias(value: &str) -> Option<Self> {
        match value {
            "inbox" => Some(Self::Inbox),
            "next" | "next_action" | "next actions" | "now" => Some(Self::Next),
            "waiting" | "waiting_for" | "waiting for" | "delegated" => Some(Self::Waiting),
            "someday" | "someday_maybe" | "someday/maybe" | "later" => Some(Self::Someday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }
}

// =============================================================================
// Per-method parameters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreateParams {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub bucket: Option<TaskBucket>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdateParams {
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub bucket: Option<TaskBucket>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCreateParams {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent_page_id: Option<Uuid>,
    #[serde(default)]
    pub generated_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdateParams {
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreateParams {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdateParams {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchCreateParams {
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Target of a delete or archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetParams {
    pub id: Uuid,
}

/// A validated action: one variant per supported method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum AgentAction {
    #[serde(rename = "task.create")]
    TaskCreate(TaskCreateParams),
    #[serde(rename = "task.update")]
    TaskUpdate(TaskUpdateParams),
    #[serde(rename = "task.delete")]
    TaskDelete(TargetParams),
    #[serde(rename = "page.create")]
    PageCreate(PageCreateParams),
    #[serde(rename = "page.update")]
    PageUpdate(PageUpdateParams),
    #[serde(rename = "page.delete")]
    PageDelete(TargetParams),
    #[serde(rename = "project.create")]
    ProjectCreate(ProjectCreateParams),
    #[serde(rename = "project.update")]
    ProjectUpdate(ProjectUpdateParams),
    #[serde(rename = "project.archive")]
    ProjectArchive(TargetParams),
    #[serde(rename = "research.create")]
    ResearchCreate(ResearchCreateParams),
}

impl AgentAction {
    /// Deserialize `params` against the schema of `method`.
    pub fn parse(method: ActionMethod, params: &Value) -> Result<Self, String> {
        fn typed<T: serde::de::DeserializeOwned>(params: &Value) -> Result<T, String> {
            serde_json::from_value(params.clone()).map_err(|e| e.to_string())
        }

        Ok(match method {
            ActionMethod::TaskCreate => AgentAction::TaskCreate(typed(params)?),
            ActionMethod::TaskUpdate => AgentAction::TaskUpdate(typed(params)?),
            ActionMethod::TaskDelete => AgentAction::TaskDelete(typed(params)?),
            ActionMethod::PageCreate => AgentAction::PageCreate(typed(params)?),
            ActionMethod::PageUpdate => AgentAction::PageUpdate(typed(params)?),
            ActionMethod::PageDelete => AgentAction::PageDelete(typed(params)?),
            ActionMethod::ProjectCreate => AgentAction::ProjectCreate(typed(params)?),
            ActionMethod::ProjectUpdate => AgentAction::ProjectUpdate(typed(params)?),
            ActionMethod::ProjectArchive => AgentAction::ProjectArchive(typed(params)?),
            ActionMethod::ResearchCreate => AgentAction::ResearchCreate(typed(params)?),
        })
    }

    pub fn method(&self) -> ActionMethod {
        match self {
            AgentAction::TaskCreate(_) => ActionMethod::TaskCreate,
            AgentAction::TaskUpdate(_) => ActionMethod::TaskUpdate,
            AgentAction::TaskDelete(_) => ActionMethod::TaskDelete,
            AgentAction::PageCreate(_) => ActionMethod::PageCreate,
            AgentAction::PageUpdate(_) => ActionMethod::PageUpdate,
            AgentAction::PageDelete(_) => ActionMethod::PageDelete,
            AgentAction::ProjectCreate(_) => ActionMethod::ProjectCreate,
            AgentAction::ProjectUpdate(_) => ActionMethod::ProjectUpdate,
            AgentAction::ProjectArchive(_) => ActionMethod::ProjectArchive,
            AgentAction::ResearchCreate(_) => ActionMethod::ResearchCreate,
        }
    }

    /// Wire form of the parameters.
    pub fn params(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut tagged)) => tagged.remove("params").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Lowercase enum-like fields, map common aliases, drop values that match
/// nothing, and fill required defaults. Never fails.
pub fn normalize(method: ActionMethod, params: &Value) -> Value {
    let mut map = match params {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    if matches!(method, ActionMethod::TaskCreate | ActionMethod::TaskUpdate) {
        normalize_field(&mut map, "status", |v| TaskStatus::from_alias(v).map(|s| s.as_str()));
        normalize_field(&mut map, "priority", |v| {
            TaskPriority::from_alias(v).map(|p| p.as_str())
        });
        normalize_field(&mut map, "bucket", |v| TaskBucket::from_alias(v).map(|b| b.as_str()));
    }
    if method == ActionMethod::ProjectUpdate {
        normalize_field(&mut map, "status", |v| {
            [
                ProjectStatus::Active,
                ProjectStatus::Paused,
                ProjectStatus::Completed,
                ProjectStatus::Archived,
            ]
            .into_iter()
            .map(|s| s.as_str())
            .find(|s| *s == v)
        });
    }

    match method {
        ActionMethod::TaskCreate => fill_default(&mut map, "title", "Untitled task"),
        ActionMethod::PageCreate => fill_default(&mut map, "title", "Untitled page"),
        ActionMethod::ProjectCreate => fill_default(&mut map, "name", "Untitled project"),
        ActionMethod::ResearchCreate => {
            fill_default(&mut map, "title", "Untitled note");
            fill_default(&mut map, "kind", "note");
            if let Some(Value::String(kind)) = map.get_mut("kind") {
                *kind = kind.trim().to_lowercase();
            }
        }
        _ => {}
    }

    Value::Object(map)
}

fn normalize_field(
    map: &mut Map<String, Value>,
    key: &str,
    canonical: impl Fn(&str) -> Option<&'static str>,
) {
    let Some(value) = map.get(key) else {
        return;
    };
    let mapped = value
        .as_str()
        .map(|s| s.trim().to_lowercase())
        .and_then(|s| canonical(&s));
    match mapped {
        Some(v) => {
            map.insert(key.to_string(), Value::String(v.to_string()));
        }
        None => {
            map.remove(key);
        }
    }
}

fn fill_default(map: &mut Map<String, Value>, key: &str, default: &str) {
    let blank = match map.get(key) {
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Null) | None => true,
        Some(_) => false,
    };
    if blank {
        map.insert(key.to_string(), Value::String(default.to_string()));
    }
}

// =============================================================================
// Generated pages
// =============================================================================

/// Family of a well-known generated page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKind {
    DailyFocus,
    WeeklyReview,
    MonthlyReview,
    ProjectRecap,
}

impl GeneratedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratedKind::DailyFocus => "daily-focus",
            GeneratedKind::WeeklyReview => "weekly-review",
            GeneratedKind::MonthlyReview => "monthly-review",
            GeneratedKind::ProjectRecap => "project-recap",
        }
    }

    /// Skip reason when the page already exists.
    pub fn exists_reason(&self) -> String {
        format!("{}-exists", self.as_str())
    }
}

/// Canonical identity of a generated page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPage {
    pub kind: GeneratedKind,
    pub title: String,
    pub key: String,
}

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static WEEK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-W\d{2}$").unwrap());
static MONTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}$").unwrap());
static RECAP_DATE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\((\d{4}-\d{2}-\d{2})\)\s*$").unwrap());

/// Strip a case-insensitive prefix, returning the trimmed remainder.
fn strip_prefix_ci<'a>(title: &'a str, prefix: &str) -> Option<&'a str> {
    let head = title.get(..prefix.len())?;
    let rest = &title[prefix.len()..];
    let at_boundary = rest.chars().next().is_none_or(|c| !c.is_alphanumeric());
    (head.eq_ignore_ascii_case(prefix) && at_boundary).then(|| rest.trim())
}

/// Recognize a generated page title and compute its canonical title and key
/// for `today` (the space's local date). Unrecognized titles yield `None`.
pub fn canonicalize_generated(title: &str, today: NaiveDate) -> Option<GeneratedPage> {
    let title = title.trim();
    let today_str = today.format("%Y-%m-%d").to_string();

    if let Some(rest) = strip_prefix_ci(title, "Daily Focus") {
        let date = if DATE_RE.is_match(rest) { rest.to_string() } else { today_str };
        return Some(GeneratedPage {
            kind: GeneratedKind::DailyFocus,
            title: format!("Daily Focus {}", date),
            key: format!("daily-focus:{}", date),
        });
    }

    if let Some(rest) = strip_prefix_ci(title, "Weekly Review") {
        let week = if WEEK_RE.is_match(rest) { rest.to_string() } else { week_key(today) };
        return Some(GeneratedPage {
            kind: GeneratedKind::WeeklyReview,
            title: format!("Weekly Review {}", week),
            key: format!("weekly-review:{}", week),
        });
    }

    if let Some(rest) = strip_prefix_ci(title, "Monthly Review") {
        let month = if MONTH_RE.is_match(rest) { rest.to_string() } else { month_key(today) };
        return Some(GeneratedPage {
            kind: GeneratedKind::MonthlyReview,
            title: format!("Monthly Review {}", month),
            key: format!("monthly-review:{}", month),
        });
    }

    if let Some(rest) = strip_prefix_ci(title, "Project Recap") {
        let rest = rest.trim_start_matches(':').trim();
        let (subject, date) = match RECAP_DATE_SUFFIX_RE.captures(rest) {
            Some(caps) => {
                let date = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or(today_str);
                let subject = rest[..caps.get(0).map(|m| m.start()).unwrap_or(rest.len())].trim();
                (subject.to_string(), date)
            }
            None if DATE_RE.is_match(rest) => (String::new(), rest.to_string()),
            None => (rest.to_string(), today_str),
        };

        return Some(if subject.is_empty() {
            GeneratedPage {
                kind: GeneratedKind::ProjectRecap,
                title: format!("Project Recap {}", date),
                key: format!("project-recap:{}", date),
            }
        } else {
            GeneratedPage {
                kind: GeneratedKind::ProjectRecap,
                title: format!("Project Recap: {} ({})", subject, date),
                key: format!("project-recap:{}:{}", subject.to_lowercase(), date),
            }
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    #[test]
    fn test_normalize_maps_aliases_and_drops_unknown() {
        let params = json!({
            "title": "Ship it",
            "status": " In Progress ",
            "priority": "CRITICAL",
            "bucket": "whenever"
        });
        let normalized = normalize(ActionMethod::TaskCreate, &params);
        assert_eq!(normalized["status"], "in_progress");
        assert_eq!(normalized["priority"], "urgent");
        assert!(normalized.get("bucket").is_none());
        assert_eq!(normalized["title"], "Ship it");
    }

    #[test]
    fn test_normalize_fills_defaults() {
        let normalized = normalize(ActionMethod::TaskCreate, &json!({"title": "   "}));
        assert_eq!(normalized["title"], "Untitled task");

        let normalized = normalize(ActionMethod::PageCreate, &Value::Null);
        assert_eq!(normalized["title"], "Untitled page");

        let normalized = normalize(ActionMethod::ResearchCreate, &json!({"kind": " Hypothesis"}));
        assert_eq!(normalized["kind"], "hypothesis");
        assert_eq!(normalized["title"], "Untitled note");
    }

    #[test]
    fn test_parse_typed_action() {
        let id = Uuid::new_v4();
        let params = normalize(
            ActionMethod::TaskUpdate,
            &json!({"id": id, "status": "Done", "dueDate": "2026-10-20"}),
        );
        let action = AgentAction::parse(ActionMethod::TaskUpdate, &params).unwrap();
        match &action {
            AgentAction::TaskUpdate(p) => {
                assert_eq!(p.id, id);
                assert_eq!(p.status, Some(TaskStatus::Done));
                assert_eq!(p.due_date, NaiveDate::from_ymd_opt(2026, 10, 20));
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(action.method(), ActionMethod::TaskUpdate);
        assert_eq!(action.params()["status"], "done");
    }

    #[test]
    fn test_parse_rejects_schema_mismatch() {
        let err = AgentAction::parse(ActionMethod::TaskDelete, &json!({"id": "not-a-uuid"}));
        assert!(err.is_err());
        let err = AgentAction::parse(ActionMethod::PageUpdate, &json!({}));
        assert!(err.is_err());
    }

    #[test]
    fn test_daily_focus_canonical() {
        let page = canonicalize_generated("daily focus", day()).unwrap();
        assert_eq!(page.title, "Daily Focus 2026-10-18");
        assert_eq!(page.key, "daily-focus:2026-10-18");
        assert_eq!(page.kind.exists_reason(), "daily-focus-exists");

        let page = canonicalize_generated("Daily Focus 2026-10-01", day()).unwrap();
        assert_eq!(page.key, "daily-focus:2026-10-01");
    }

    #[test]
    fn test_review_canonical() {
        let weekly = canonicalize_generated("Weekly Review", day()).unwrap();
        assert_eq!(weekly.title, "Weekly Review 2026-W42");
        assert_eq!(weekly.key, "weekly-review:2026-W42");

        let monthly = canonicalize_generated("Monthly Review", day()).unwrap();
        assert_eq!(monthly.title, "Monthly Review 2026-10");
    }

    #[test]
    fn test_project_recap_canonical() {
        let plain = canonicalize_generated("Project Recap", day()).unwrap();
        assert_eq!(plain.title, "Project Recap 2026-10-18");
        assert_eq!(plain.key, "project-recap:2026-10-18");

        let named = canonicalize_generated("Project Recap: Apollo", day()).unwrap();
        assert_eq!(named.title, "Project Recap: Apollo (2026-10-18)");
        assert_eq!(named.key, "project-recap:apollo:2026-10-18");

        // Already canonical titles are stable.
        let again = canonicalize_generated(&named.title, day()).unwrap();
        assert_eq!(again, named);
    }

    #[test]
    fn test_other_titles_not_generated() {
        assert!(canonicalize_generated("Meeting notes", day()).is_none());
        assert!(canonicalize_generated("Daily", day()).is_none());
        assert!(canonicalize_generated("Daily Focused work", day()).is_none());
    }
}
