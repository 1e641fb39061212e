//! Core types for the pattern engine.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The eight structural conditions the engine looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Convergence,
    Contradiction,
    Staleness,
    CrossDomain,
    UntestedImplication,
    IntakeGate,
    EvidenceGap,
    ReproductionFailure,
}

impl PatternType {
    pub const ALL: [PatternType; 8] = [
        PatternType::Convergence,
        PatternType::Contradiction,
        PatternType::Staleness,
        PatternType::CrossDomain,
        PatternType::UntestedImplication,
        PatternType::IntakeGate,
        PatternType::EvidenceGap,
        PatternType::ReproductionFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Convergence => "convergence",
            PatternType::Contradiction => "contradiction",
            PatternType::Staleness => "staleness",
            PatternType::CrossDomain => "cross_domain",
            PatternType::UntestedImplication => "untested_implication",
            PatternType::IntakeGate => "intake_gate",
            PatternType::EvidenceGap => "evidence_gap",
            PatternType::ReproductionFailure => "reproduction_failure",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternType::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown pattern type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Detection lifecycle. A dismissed detection is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Detected,
    Acknowledged,
    Dismissed,
}

impl DetectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStatus::Detected => "detected",
            DetectionStatus::Acknowledged => "acknowledged",
            DetectionStatus::Dismissed => "dismissed",
        }
    }

    pub fn can_transition_to(&self, next: DetectionStatus) -> bool {
        matches!(
            (self, next),
            (DetectionStatus::Detected, DetectionStatus::Acknowledged)
                | (DetectionStatus::Detected, DetectionStatus::Dismissed)
                | (DetectionStatus::Acknowledged, DetectionStatus::Dismissed)
        )
    }
}

impl FromStr for DetectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detected" => Ok(DetectionStatus::Detected),
            "acknowledged" => Ok(DetectionStatus::Acknowledged),
            "dismissed" => Ok(DetectionStatus::Dismissed),
            other => Err(format!("unknown detection status: {}", other)),
        }
    }
}

/// What happens once a detection is recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternAction {
    #[default]
    Notify,
    Flag,
    Surface,
    CreateTask,
}

impl PatternAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternAction::Notify => "notify",
            PatternAction::Flag => "flag",
            PatternAction::Surface => "surface",
            PatternAction::CreateTask => "create_task",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternRule {
    pub enabled: bool,
    pub action: PatternAction,
}

impl Default for PatternRule {
    fn default() -> Self {
        Self {
            enabled: true,
            action: PatternAction::Notify,
        }
    }
}

/// Per-workspace pattern settings, stored under the `patterns` key of the
/// workspace settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSettings {
    pub enabled: bool,
    pub rules: HashMap<PatternType, PatternRule>,
}

impl PatternSettings {
    /// Missing rules fall back to enabled + notify.
    pub fn rule(&self, pattern: PatternType) -> PatternRule {
        self.rules.get(&pattern).cloned().unwrap_or_default()
    }

    /// Read from a raw settings document; malformed input yields defaults.
    pub fn from_document(document: Option<&serde_json::Value>) -> Self {
        document
            .and_then(|doc| doc.get("patterns"))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

/// A condition found by an evaluator, before it is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub pattern_type: PatternType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Typed identity of the condition, also embedded in `details`.
    pub dedup_key: String,
    pub details: serde_json::Value,
}

/// Result of one workspace scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub workspace_id: Uuid,
    pub created: Vec<Uuid>,
    pub failed_evaluators: Vec<String>,
}
