//! Policy evaluation: which proposed methods may run unattended.

use std::sync::Arc;

use crate::approval::ApprovalLedger;
use crate::settings::AgentSettings;
use crate::types::{ActionMethod, DecisionReason, PolicyDecision};

/// Maps a method to auto / approval / deny for a workspace's settings.
///
/// Pure apart from the ledger's static sensitivity lookup, so one evaluator is
/// shared by every caller.
#[derive(Clone)]
pub struct PolicyEvaluator {
    ledger: Arc<dyn ApprovalLedger>,
}

impl PolicyEvaluator {
    pub fn new(ledger: Arc<dyn ApprovalLedger>) -> Self {
        Self { ledger }
    }

    /// First matching rule wins.
    pub fn evaluate(&self, method: &str, settings: &AgentSettings) -> PolicyDecision {
        let Ok(parsed) = method.parse::<ActionMethod>() else {
            return PolicyDecision::deny(DecisionReason::UnsupportedMethod);
        };
        let name = parsed.as_str();
        let policy = &settings.policy;
        let listed = |list: &[String]| list.iter().any(|m| m.trim() == name);

        if listed(&policy.deny) {
            return PolicyDecision::deny(DecisionReason::PolicyDeny);
        }
        if !settings.allows_writes(parsed.permission()) {
            return PolicyDecision::approval(DecisionReason::WritesDisabled);
        }
        if listed(&policy.require_approval) {
            return PolicyDecision::approval(DecisionReason::PolicyApproval);
        }
        if self.ledger.requires_approval(name) {
            return PolicyDecision::approval(DecisionReason::SensitiveMethod);
        }
        if !policy.allow_auto_apply.is_empty() {
            if listed(&policy.allow_auto_apply) {
                return PolicyDecision::auto(DecisionReason::PolicyAuto);
            }
            return PolicyDecision::approval(DecisionReason::PolicyApproval);
        }
        PolicyDecision::auto(DecisionReason::WritesAllowed)
    }
}
