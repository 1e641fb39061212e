use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Methods and permissions
// =============================================================================

/// Resource family a method writes to. Each family has its own write toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKey {
    Tasks,
    Pages,
    Projects,
    Research,
}

/// The closed set of workspace methods the agent may invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionMethod {
    #[serde(rename = "task.create")]
    TaskCreate,
    #[serde(rename = "task.update")]
    TaskUpdate,
    #[serde(rename = "task.delete")]
    TaskDelete,
    #[serde(rename = "page.create")]
    PageCreate,
    #[serde(rename = "page.update")]
    PageUpdate,
    #[serde(rename = "page.delete")]
    PageDelete,
    #[serde(rename = "project.create")]
    ProjectCreate,
    #[serde(rename = "project.update")]
    ProjectUpdate,
    #[serde(rename = "project.archive")]
    ProjectArchive,
    #[serde(rename = "research.create")]
    ResearchCreate,
}

impl ActionMethod {
    pub const ALL: [ActionMethod; 10] = [
        ActionMethod::TaskCreate,
        ActionMethod::TaskUpdate,
        ActionMethod::TaskDelete,
        ActionMethod::PageCreate,
        ActionMethod::PageUpdate,
        ActionMethod::PageDelete,
        ActionMethod::ProjectCreate,
        ActionMethod::ProjectUpdate,
        ActionMethod::ProjectArchive,
        ActionMethod::ResearchCreate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionMethod::TaskCreate => "task.create",
            ActionMethod::TaskUpdate => "task.update",
            ActionMethod::TaskDelete => "task.delete",
            ActionMethod::PageCreate => "page.create",
            ActionMethod::PageUpdate => "page.update",
            ActionMethod::PageDelete => "page.delete",
            ActionMethod::ProjectCreate => "project.create",
            ActionMethod::ProjectUpdate => "project.update",
            ActionMethod::ProjectArchive => "project.archive",
            ActionMethod::ResearchCreate => "research.create",
        }
    }

    pub fn permission(&self) -> PermissionKey {
        match self {
            ActionMethod::TaskCreate | ActionMethod::TaskUpdate | ActionMethod::TaskDelete => {
                PermissionKey::Tasks
            }
            ActionMethod::PageCreate | ActionMethod::PageUpdate | ActionMethod::PageDelete => {
                PermissionKey::Pages
            }
            ActionMethod::ProjectCreate
            | ActionMethod::ProjectUpdate
            | ActionMethod::ProjectArchive => PermissionKey::Projects,
            ActionMethod::ResearchCreate => PermissionKey::Research,
        }
    }

    /// Destructive methods always need a human in the loop.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            ActionMethod::TaskDelete | ActionMethod::PageDelete | ActionMethod::ProjectArchive
        )
    }
}

impl fmt::Display for ActionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| format!("Unsupported method: {}", s))
    }
}

// =============================================================================
// Caller identity
// =============================================================================

/// Who an agent operation acts for and where.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorContext {
    pub workspace_id: Uuid,
    pub space_id: Uuid,
    pub user_id: Uuid,
}

// =============================================================================
// Proposals and policy decisions
// =============================================================================

/// An action as proposed by the planner, before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedAction {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl ProposedAction {
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            method: method.to_string(),
            params,
            rationale: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Auto,
    Approval,
    Deny,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    UnsupportedMethod,
    PolicyDeny,
    WritesDisabled,
    PolicyApproval,
    SensitiveMethod,
    PolicyAuto,
    WritesAllowed,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::UnsupportedMethod => "unsupported-method",
            DecisionReason::PolicyDeny => "policy-deny",
            DecisionReason::WritesDisabled => "writes-disabled",
            DecisionReason::PolicyApproval => "policy-approval",
            DecisionReason::SensitiveMethod => "sensitive-method",
            DecisionReason::PolicyAuto => "policy-auto",
            DecisionReason::WritesAllowed => "writes-allowed",
        }
    }
}

/// Outcome of evaluating a method against the workspace policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: DecisionKind,
    pub reason: DecisionReason,
}

impl PolicyDecision {
    pub fn auto(reason: DecisionReason) -> Self {
        Self {
            decision: DecisionKind::Auto,
            reason,
        }
    }

    pub fn approval(reason: DecisionReason) -> Self {
        Self {
            decision: DecisionKind::Approval,
            reason,
        }
    }

    pub fn deny(reason: DecisionReason) -> Self {
        Self {
            decision: DecisionKind::Deny,
            reason,
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.decision {
            DecisionKind::Auto => "auto",
            DecisionKind::Approval => "approval",
            DecisionKind::Deny => "deny",
        };
        write!(f, "{}:{}", kind, self.reason.as_str())
    }
}

// =============================================================================
// Execution results
// =============================================================================

/// Lifecycle phase of a proposed action. `Validated` is transient; every
/// recorded result carries one of the terminal phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    Validated,
    Approval,
    Executed,
    Failed,
    Denied,
    Skipped,
}

impl ActionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionPhase::Validated => "validated",
            ActionPhase::Approval => "approval",
            ActionPhase::Executed => "executed",
            ActionPhase::Failed => "failed",
            ActionPhase::Denied => "denied",
            ActionPhase::Skipped => "skipped",
        }
    }
}

/// Terminal record of one action attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub method: String,
    pub phase: ActionPhase,
    /// `executed`, `failed`, `denied`, `skipped`, or `approval_required:<token>`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ActionResult {
    fn terminal(method: &str, phase: ActionPhase) -> Self {
        Self {
            method: method.to_string(),
            phase,
            status: phase.as_str().to_string(),
            reason: None,
            attempts: 0,
            error: None,
            approval_token: None,
            result: None,
        }
    }

    pub fn skipped(method: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::terminal(method, ActionPhase::Skipped)
        }
    }

    pub fn denied(method: &str, reason: DecisionReason) -> Self {
        Self {
            reason: Some(reason.as_str().to_string()),
            ..Self::terminal(method, ActionPhase::Denied)
        }
    }

    pub fn approval(method: &str, reason: &str, token: &str) -> Self {
        Self {
            status: format!("approval_required:{}", token),
            reason: Some(reason.to_string()),
            approval_token: Some(token.to_string()),
            ..Self::terminal(method, ActionPhase::Approval)
        }
    }

    pub fn executed(method: &str, attempts: u32, result: serde_json::Value) -> Self {
        Self {
            attempts,
            result: Some(result),
            ..Self::terminal(method, ActionPhase::Executed)
        }
    }

    pub fn failed(method: &str, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            attempts,
            error: Some(error.into()),
            ..Self::terminal(method, ActionPhase::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip_through_str() {
        for method in ActionMethod::ALL {
            assert_eq!(method.as_str().parse::<ActionMethod>().unwrap(), method);
        }
        assert!("task.explode".parse::<ActionMethod>().is_err());
        assert_eq!(
            serde_json::to_value(ActionMethod::ProjectArchive).unwrap(),
            "project.archive"
        );
    }

    #[test]
    fn test_sensitive_methods() {
        let sensitive: Vec<_> = ActionMethod::ALL
            .into_iter()
            .filter(|m| m.is_sensitive())
            .collect();
        assert_eq!(
            sensitive,
            vec![
                ActionMethod::TaskDelete,
                ActionMethod::PageDelete,
                ActionMethod::ProjectArchive
            ]
        );
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(
            PolicyDecision::deny(DecisionReason::UnsupportedMethod).to_string(),
            "deny:unsupported-method"
        );
        assert_eq!(
            PolicyDecision::auto(DecisionReason::WritesAllowed).to_string(),
            "auto:writes-allowed"
        );
    }

    #[test]
    fn test_approval_result_embeds_token() {
        let result = ActionResult::approval("task.delete", "sensitive-method", "abc123");
        assert_eq!(result.status, "approval_required:abc123");
        assert_eq!(result.phase, ActionPhase::Approval);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["approvalToken"], "abc123");
        assert_eq!(json["phase"], "approval");
    }
}
