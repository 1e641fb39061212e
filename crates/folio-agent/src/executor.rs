//! Action executor: validation, idempotency guard, policy, bounded retry.
//!
//! Every proposed action ends in exactly one [`ActionResult`]. Nothing in
//! here returns an error to the caller; failures are recorded in the result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use folio_core::config::AgentConfig;
use folio_core::events::{DomainEvent, EventSink};
use folio_core::types::{local_date, parse_timezone, Timestamp};
use folio_storage::{Database, PageRepository};

use crate::actions::{canonicalize_generated, normalize, AgentAction, GeneratedPage};
use crate::approval::ApprovalLedger;
use crate::dispatch::{ActionDispatcher, DispatchContext, RpcError, RpcRequest};
use crate::policy::PolicyEvaluator;
use crate::settings::AgentSettings;
use crate::types::{ActionMethod, ActionPhase, ActionResult, ActorContext, DecisionKind, ProposedAction};

/// Error message fragments that mark a failure as worth one more attempt.
const TRANSIENT_MARKERS: [&str; 7] = [
    "timeout",
    "temporar",
    "rate limit",
    "rate-limit",
    "econnreset",
    "connection reset",
    "unavailable",
];

/// Case-insensitive transient-failure classification.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Hard cap on actions considered per batch.
    pub max_actions: usize,
    /// Dispatch attempts per action, counting the first.
    pub max_attempts: u32,
    pub approval_ttl_secs: u64,
    pub retry_delay: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_actions: 3,
            max_attempts: 2,
            approval_ttl_secs: 600,
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl From<&AgentConfig> for ExecutorOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_actions: config.max_actions_per_run,
            max_attempts: config.max_attempts.max(1),
            approval_ttl_secs: config.approval_ttl_secs,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

pub struct ActionExecutor {
    policy: PolicyEvaluator,
    ledger: Arc<dyn ApprovalLedger>,
    dispatcher: Arc<dyn ActionDispatcher>,
    pages: PageRepository,
    events: Arc<dyn EventSink>,
    options: ExecutorOptions,
}

impl ActionExecutor {
    pub fn new(
        db: Arc<Database>,
        ledger: Arc<dyn ApprovalLedger>,
        dispatcher: Arc<dyn ActionDispatcher>,
        events: Arc<dyn EventSink>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            policy: PolicyEvaluator::new(Arc::clone(&ledger)),
            ledger,
            dispatcher,
            pages: PageRepository::new(db),
            events,
            options,
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Execute proposals in order, considering at most `max_actions` of them.
    pub async fn execute_all(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        proposals: &[ProposedAction],
    ) -> Vec<ActionResult> {
        if proposals.len() > self.options.max_actions {
            debug!(
                proposed = proposals.len(),
                cap = self.options.max_actions,
                "Truncating proposed actions"
            );
        }
        let mut results = Vec::new();
        for proposal in proposals.iter().take(self.options.max_actions) {
            results.push(self.execute(actor, settings, proposal).await);
        }
        results
    }

    /// Run one proposal to a terminal result and publish it.
    pub async fn execute(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        proposal: &ProposedAction,
    ) -> ActionResult {
        let today = local_date(Utc::now(), parse_timezone(&settings.autonomy_schedule.timezone));
        let result = self.run(actor, settings, proposal, today).await;

        info!(
            workspace_id = %actor.workspace_id,
            space_id = %actor.space_id,
            method = %result.method,
            phase = result.phase.as_str(),
            attempts = result.attempts,
            "Agent action finished"
        );
        self.events.publish(DomainEvent::ActionExecuted {
            workspace_id: actor.workspace_id,
            space_id: actor.space_id,
            user_id: actor.user_id,
            method: result.method.clone(),
            phase: result.phase.as_str().to_string(),
            status: result.status.clone(),
            attempts: result.attempts,
            error: result.error.clone(),
            timestamp: Timestamp::now(),
        });
        result
    }

    async fn run(
        &self,
        actor: &ActorContext,
        settings: &AgentSettings,
        proposal: &ProposedAction,
        today: NaiveDate,
    ) -> ActionResult {
        let raw_method = proposal.method.trim();
        let Ok(method) = raw_method.parse::<ActionMethod>() else {
            return ActionResult::skipped(raw_method, "unsupported-method");
        };
        let name = method.as_str();

        let mut params = normalize(method, &proposal.params);

        let generated = if method == ActionMethod::PageCreate {
            canonicalize_page(&mut params, today)
        } else {
            None
        };
        if let Some(ref page) = generated {
            if self.generated_page_exists(actor, page) {
                return ActionResult::skipped(name, page.kind.exists_reason());
            }
        }

        let action = match AgentAction::parse(method, &params) {
            Ok(action) => action,
            Err(e) => return ActionResult::skipped(name, format!("invalid-params: {}", e)),
        };
        let params = action.params();

        let decision = self.policy.evaluate(name, settings);
        match decision.decision {
            DecisionKind::Deny => return ActionResult::denied(name, decision.reason),
            DecisionKind::Approval => {
                return self.hold_for_approval(actor, name, &params, decision.reason.as_str());
            }
            DecisionKind::Auto => {}
        }

        self.dispatch_with_retry(actor, name, params, generated.as_ref())
            .await
    }

    fn generated_page_exists(&self, actor: &ActorContext, page: &GeneratedPage) -> bool {
        let by_title = self.pages.find_by_title(actor.space_id, &page.title);
        let by_key = self.pages.find_by_generated_key(actor.space_id, &page.key);
        match (by_title, by_key) {
            (Ok(a), Ok(b)) => a.is_some() || b.is_some(),
            (Err(e), _) | (_, Err(e)) => {
                // The unique index still guards the insert.
                warn!(space_id = %actor.space_id, error = %e, "Generated page lookup failed");
                false
            }
        }
    }

    fn hold_for_approval(
        &self,
        actor: &ActorContext,
        method: &str,
        params: &Value,
        reason: &str,
    ) -> ActionResult {
        match self.ledger.create_approval(
            actor,
            method,
            params,
            reason,
            self.options.approval_ttl_secs,
        ) {
            Ok(grant) => {
                self.publish_approval(actor, method, reason, &grant.token, grant.expires_at);
                ActionResult::approval(method, reason, &grant.token)
            }
            Err(e) => {
                warn!(method, error = %e, "Failed to create approval");
                ActionResult::failed(method, 0, e.to_string())
            }
        }
    }

    fn publish_approval(
        &self,
        actor: &ActorContext,
        method: &str,
        reason: &str,
        token: &str,
        expires_at: Timestamp,
    ) {
        self.events.publish(DomainEvent::ApprovalRequested {
            workspace_id: actor.workspace_id,
            space_id: actor.space_id,
            user_id: actor.user_id,
            method: method.to_string(),
            reason: reason.to_string(),
            token: token.to_string(),
            expires_at,
            timestamp: Timestamp::now(),
        });
    }

    async fn dispatch_with_retry(
        &self,
        actor: &ActorContext,
        method: &str,
        params: Value,
        generated: Option<&GeneratedPage>,
    ) -> ActionResult {
        let ctx = DispatchContext::new(*actor);
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request = RpcRequest::new(method, params.clone(), u64::from(attempt));
            let error: RpcError = match self.dispatcher.dispatch(&ctx, request).await.into_result() {
                Ok(result) => {
                    if result.get("created").and_then(Value::as_bool) == Some(false) {
                        let reason = generated
                            .map(|g| g.kind.exists_reason())
                            .unwrap_or_else(|| "page-exists".to_string());
                        return ActionResult {
                            attempts: attempt,
                            ..ActionResult::skipped(method, reason)
                        };
                    }
                    return ActionResult::executed(method, attempt, result);
                }
                Err(error) => error,
            };

            if let Some(token) = error.approval_token() {
                let expires_at = error
                    .data
                    .as_ref()
                    .and_then(|d| d.get("expiresAt"))
                    .and_then(Value::as_i64)
                    .map(Timestamp)
                    .unwrap_or_else(Timestamp::now);
                self.publish_approval(actor, method, "sensitive-method", token, expires_at);
                return ActionResult {
                    attempts: attempt,
                    ..ActionResult::approval(method, "sensitive-method", token)
                };
            }

            if attempt < max_attempts && is_transient(&error.message) {
                debug!(method, attempt, error = %error.message, "Transient failure, retrying");
                if !self.options.retry_delay.is_zero() {
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                continue;
            }

            warn!(method, attempts = attempt, error = %error.message, "Agent action failed");
            return ActionResult::failed(method, attempt, error.message);
        }
    }
}

/// Rewrite a generated page's title and key in place.
fn canonicalize_page(params: &mut Value, today: NaiveDate) -> Option<GeneratedPage> {
    let title = params.get("title")?.as_str()?;
    let page = canonicalize_generated(title, today)?;
    if let Value::Object(map) = params {
        map.insert("title".into(), Value::String(page.title.clone()));
        map.insert("generatedKey".into(), Value::String(page.key.clone()));
    }
    Some(page)
}

/// Number of results that ended in `phase`.
pub fn count_by_phase(results: &[ActionResult], phase: ActionPhase) -> usize {
    results.iter().filter(|r| r.phase == phase).count()
}
