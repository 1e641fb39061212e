//! Agent pipeline for Folio.
//!
//! Decides which proposed actions may run, holds the rest for approval,
//! executes the allowed ones with bounded retry, and drives the planning
//! cascade, the autonomous loop, and its cadence schedule.

pub mod actions;
pub mod approval;
pub mod assistant;
pub mod audit;
pub mod cascade;
pub mod context;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod llm;
pub mod orchestrator;
pub mod plan;
pub mod policy;
pub mod recurring;
pub mod schedule;
pub mod service;
pub mod settings;
pub mod types;

pub use approval::{ApprovalGrant, ApprovalLedger, InMemoryApprovalLedger, SqliteApprovalLedger};
pub use assistant::{Assistant, ChatReply, HandoffBrief, Suggestion};
pub use audit::AuditRecorder;
pub use cascade::{CascadeOutcome, Horizon, PlanRecord, PlanStatus, PlanStore, PlanningCascade};
pub use diff::{diff_plans, PlanDiff, Significance};
pub use dispatch::{ActionDispatcher, DispatchContext, InternalProcessor, RpcRequest, RpcResponse};
pub use error::{AgentError, ApprovalError, LlmError, PlanError, SchedulerError};
pub use executor::{ActionExecutor, ExecutorOptions};
pub use llm::{LanguageModel, OpenAiChatModel};
pub use orchestrator::{AgentLoop, LoopOutcome};
pub use plan::PlanProposal;
pub use policy::PolicyEvaluator;
pub use recurring::RecurringTask;
pub use schedule::{CadenceScheduler, ScheduledRun, TickReport};
pub use service::{configured_model, AgentService};
pub use settings::{AgentSettings, SettingsService};
pub use types::{ActionMethod, ActionPhase, ActionResult, ActorContext, PolicyDecision, ProposedAction};
