//! Best-effort extraction of a plan proposal from model output.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::types::ProposedAction;

pub const NO_ACTIONS_SUMMARY: &str = "No actions proposed.";

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

/// What the planner proposes for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProposal {
    pub summary: String,
    pub actions: Vec<ProposedAction>,
    pub review_questions: Vec<String>,
}

impl PlanProposal {
    /// The plan used whenever generation is unavailable or fails.
    pub fn empty() -> Self {
        Self {
            summary: NO_ACTIONS_SUMMARY.to_string(),
            actions: Vec::new(),
            review_questions: Vec::new(),
        }
    }
}

/// Parse model output into a proposal. Never fails.
///
/// Looks for JSON in a fenced block first, then between the first `{` and the
/// last `}`. Unparseable output becomes the summary, cut to `fallback_chars`.
/// Malformed action entries are dropped individually.
pub fn parse_plan(text: &str, fallback_chars: usize) -> PlanProposal {
    let Some(json) = extract_json(text) else {
        debug!("Plan output had no JSON object, using text fallback");
        return with_default_summary(PlanProposal {
            summary: text.trim().chars().take(fallback_chars).collect(),
            actions: Vec::new(),
            review_questions: Vec::new(),
        });
    };

    let summary = json
        .get("summary")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let actions = json
        .get("actions")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_action).collect())
        .unwrap_or_default();

    let mut review_questions: Vec<String> = Vec::new();
    if let Some(items) = json.get("reviewQuestions").and_then(Value::as_array) {
        for question in items.iter().filter_map(Value::as_str).map(str::trim) {
            if !question.is_empty() && !review_questions.iter().any(|q| q == question) {
                review_questions.push(question.to_string());
            }
        }
    }

    with_default_summary(PlanProposal {
        summary,
        actions,
        review_questions,
    })
}

fn extract_json(text: &str) -> Option<Value> {
    let fenced = FENCE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .find_map(|m| as_object(m.as_str()));
    if fenced.is_some() {
        return fenced;
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(&text[start..=end])
}

fn as_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate.trim())
        .ok()
        .filter(Value::is_object)
}

fn parse_action(item: &Value) -> Option<ProposedAction> {
    let method = item.get("method")?.as_str()?.trim();
    if method.is_empty() {
        return None;
    }
    Some(ProposedAction {
        method: method.to_string(),
        params: item.get("params").cloned().unwrap_or(Value::Null),
        rationale: item
            .get("rationale")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn with_default_summary(mut plan: PlanProposal) -> PlanProposal {
    if plan.summary.is_empty() {
        plan.summary = if plan.actions.is_empty() {
            NO_ACTIONS_SUMMARY.to_string()
        } else {
            format!("Proposed {} actions.", plan.actions.len())
        };
    }
    plan
}
