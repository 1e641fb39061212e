//! Line-set diff between successive plan texts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

const MAJOR_RATIO: f64 = 0.35;
const MODERATE_RATIO: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    New,
    Minor,
    Moderate,
    Major,
}

impl Significance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Significance::New => "new",
            Significance::Minor => "minor",
            Significance::Moderate => "moderate",
            Significance::Major => "major",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDiff {
    pub added: usize,
    pub removed: usize,
    pub ratio: f64,
    pub significance: Significance,
}

impl PlanDiff {
    /// Human-readable one-liner stored alongside the plan.
    pub fn summary(&self) -> String {
        match self.significance {
            Significance::New => "First plan for this horizon.".to_string(),
            _ => format!(
                "{} change: {} lines added, {} removed.",
                capitalize(self.significance.as_str()),
                self.added,
                self.removed
            ),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn line_set(text: &str) -> HashSet<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Compare plan texts as sets of trimmed, non-empty lines.
///
/// `ratio` is `(added + removed) / (|previous| + |next|)`, zero when both
/// sides are empty.
pub fn diff_plans(previous: Option<&str>, next: &str) -> PlanDiff {
    let next_lines = line_set(next);
    let Some(previous) = previous else {
        return PlanDiff {
            added: next_lines.len(),
            removed: 0,
            ratio: 1.0,
            significance: Significance::New,
        };
    };
    let prev_lines = line_set(previous);

    let added = next_lines.difference(&prev_lines).count();
    let removed = prev_lines.difference(&next_lines).count();
    let total = prev_lines.len() + next_lines.len();
    let ratio = if total == 0 {
        0.0
    } else {
        (added + removed) as f64 / total as f64
    };

    let significance = if ratio >= MAJOR_RATIO {
        Significance::Major
    } else if ratio >= MODERATE_RATIO {
        Significance::Moderate
    } else {
        Significance::Minor
    };

    PlanDiff {
        added,
        removed,
        ratio,
        significance,
    }
}
