//! Route handler functions for all API endpoints.
//!
//! Agent routes take a JSON body naming the space they act in; the
//! workspace and user come from the [`AgentCaller`] headers. Every handler
//! checks that the space belongs to the caller's workspace before acting.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use folio_agent::assistant::{ChatReply, HandoffBrief, Suggestion};
use folio_agent::{
    ActionResult, ActorContext, AgentSettings, CascadeOutcome, LoopOutcome, PlanProposal,
    PlanRecord, ScheduledRun,
};
use folio_core::types::Cadence;
use folio_patterns::{DetectionStatus, PatternSettings, ScanReport};
use folio_storage::{DetectionRecord, ReviewPrompt};

use crate::auth::AgentCaller;
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_DETECTION_LIMIT: usize = 50;
const MAX_DETECTION_LIMIT: usize = 200;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceRequest {
    pub space_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub space_id: Uuid,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeRequest {
    pub space_id: Uuid,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDecisionRequest {
    pub space_id: Uuid,
    pub plan_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRunRequest {
    pub space_id: Uuid,
    pub cadence: Cadence,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRequest {
    pub space_id: Uuid,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewListRequest {
    pub space_id: Uuid,
    pub week_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewConsumeRequest {
    pub space_id: Uuid,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmApprovalRequest {
    pub space_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsQuery {
    pub space_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdateRequest {
    pub space_id: Option<Uuid>,
    pub settings: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionListRequest {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRequest {
    pub id: Uuid,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub generation_available: bool,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub agent: AgentSettings,
    pub patterns: PatternSettings,
}

#[derive(Debug, Serialize)]
pub struct ReviewPromptsResponse {
    pub prompts: Vec<ReviewPrompt>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumedResponse {
    pub consumed: usize,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Serialize)]
pub struct DetectionsResponse {
    pub detections: Vec<DetectionRecord>,
}

// =============================================================================
// Caller scoping
// =============================================================================

fn ensure_workspace(state: &AppState, caller: &AgentCaller) -> Result<(), ApiError> {
    state
        .workspaces
        .get_workspace(caller.workspace_id)?
        .map(|_| ())
        .ok_or_else(|| ApiError::NotFound(format!("Workspace {} not found", caller.workspace_id)))
}

fn actor(state: &AppState, caller: &AgentCaller, space_id: Uuid) -> Result<ActorContext, ApiError> {
    let space = state
        .workspaces
        .get_space(space_id)?
        .filter(|s| s.workspace_id == caller.workspace_id && s.archived_at.is_none())
        .ok_or_else(|| ApiError::NotFound(format!("Space {} not found", space_id)))?;
    Ok(ActorContext {
        workspace_id: caller.workspace_id,
        space_id: space.id,
        user_id: caller.user_id,
    })
}

// =============================================================================
// Public
// =============================================================================

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        generation_available: state.agent.generation_available(),
        server_time: Utc::now(),
    })
}

/// GET /events/stream - SSE stream of the caller's domain events.
pub async fn stream(
    State(state): State<AppState>,
    caller: AgentCaller,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send> {
    let rx = state.events.subscribe();
    let workspace_id = caller.workspace_id;
    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.workspace_id() == Some(workspace_id) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event.event_name()).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

// =============================================================================
// Agent
// =============================================================================

/// POST /agent/chat
pub async fn chat(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    Ok(Json(state.agent.chat(&actor, &req.message).await?))
}

/// POST /agent/plan - propose actions without executing them.
pub async fn plan(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<SpaceRequest>,
) -> Result<Json<PlanProposal>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    Ok(Json(state.agent.propose_plan(&actor).await?))
}

/// POST /agent/plan/cascade
pub async fn plan_cascade(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<CascadeRequest>,
) -> Result<Json<CascadeOutcome>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    Ok(Json(state.agent.run_cascade(&actor, req.force).await?))
}

/// POST /agent/plan/approve
pub async fn plan_approve(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<PlanDecisionRequest>,
) -> Result<Json<PlanRecord>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    Ok(Json(state.agent.approve_plan(&actor, req.plan_id)?))
}

/// POST /agent/plan/reject
pub async fn plan_reject(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<PlanDecisionRequest>,
) -> Result<Json<PlanRecord>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    Ok(Json(state.agent.reject_plan(
        &actor,
        req.plan_id,
        req.reason.as_deref(),
    )?))
}

/// POST /agent/loop/run
pub async fn loop_run(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<SpaceRequest>,
) -> Result<Json<LoopOutcome>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    Ok(Json(state.agent.run_loop(&actor).await?))
}

/// POST /agent/loop/schedule-run - fire one cadence immediately.
pub async fn loop_schedule_run(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<ScheduleRunRequest>,
) -> Result<Json<ScheduledRun>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    Ok(Json(state.agent.schedule_run(&actor, req.cadence).await?))
}

/// POST /agent/handoff
pub async fn handoff(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<HandoffRequest>,
) -> Result<Json<HandoffBrief>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    Ok(Json(state.agent.handoff(&actor, req.note.as_deref())?))
}

/// POST /agent/review-prompts/list
pub async fn review_prompts_list(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<ReviewListRequest>,
) -> Result<Json<ReviewPromptsResponse>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    let prompts = state
        .agent
        .list_review_prompts(&actor, req.week_key.as_deref())?;
    Ok(Json(ReviewPromptsResponse { prompts }))
}

/// POST /agent/review-prompts/consume
pub async fn review_prompts_consume(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<ReviewConsumeRequest>,
) -> Result<Json<ConsumedResponse>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    if req.ids.is_empty() {
        return Err(ApiError::BadRequest("ids must not be empty".to_string()));
    }
    let consumed = state.agent.consume_review_prompts(&actor, &req.ids)?;
    Ok(Json(ConsumedResponse { consumed }))
}

/// POST /agent/suggestions
pub async fn suggestions(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<SpaceRequest>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    let suggestions = state.agent.suggestions(&actor)?;
    Ok(Json(SuggestionsResponse { suggestions }))
}

/// POST /agent/approvals/confirm - redeem a token and apply its action.
pub async fn approvals_confirm(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<ConfirmApprovalRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    let actor = actor(&state, &caller, req.space_id)?;
    if req.token.trim().is_empty() {
        return Err(ApiError::BadRequest("token is required".to_string()));
    }
    Ok(Json(state.agent.confirm_approval(&actor, &req.token).await?))
}

/// GET /agent/settings - effective settings for the workspace or a space.
pub async fn get_settings(
    State(state): State<AppState>,
    caller: AgentCaller,
    Query(query): Query<SettingsQuery>,
) -> Result<Json<SettingsResponse>, ApiError> {
    ensure_workspace(&state, &caller)?;
    if let Some(space_id) = query.space_id {
        actor(&state, &caller, space_id)?;
    }
    Ok(Json(SettingsResponse {
        agent: state.agent.settings(caller.workspace_id, query.space_id)?,
        patterns: state.patterns.settings(caller.workspace_id)?,
    }))
}

/// PUT /agent/settings - partial update at workspace or space scope.
pub async fn update_settings(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<SettingsUpdateRequest>,
) -> Result<Json<SettingsResponse>, ApiError> {
    ensure_workspace(&state, &caller)?;
    if let Some(space_id) = req.space_id {
        actor(&state, &caller, space_id)?;
    }
    let agent = state
        .agent
        .update_settings(caller.workspace_id, req.space_id, &req.settings)?;
    Ok(Json(SettingsResponse {
        agent,
        patterns: state.patterns.settings(caller.workspace_id)?,
    }))
}

// =============================================================================
// Patterns
// =============================================================================

/// POST /patterns/list
pub async fn patterns_list(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<DetectionListRequest>,
) -> Result<Json<DetectionsResponse>, ApiError> {
    ensure_workspace(&state, &caller)?;
    let status = req
        .status
        .as_deref()
        .map(str::parse::<DetectionStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = req
        .limit
        .unwrap_or(DEFAULT_DETECTION_LIMIT)
        .clamp(1, MAX_DETECTION_LIMIT);
    let detections = state.patterns.list(caller.workspace_id, status, limit)?;
    Ok(Json(DetectionsResponse { detections }))
}

/// POST /patterns/acknowledge
pub async fn patterns_acknowledge(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<DetectionRequest>,
) -> Result<Json<DetectionRecord>, ApiError> {
    Ok(Json(state.patterns.acknowledge(caller.workspace_id, req.id)?))
}

/// POST /patterns/dismiss
pub async fn patterns_dismiss(
    State(state): State<AppState>,
    caller: AgentCaller,
    Json(req): Json<DetectionRequest>,
) -> Result<Json<DetectionRecord>, ApiError> {
    Ok(Json(state.patterns.dismiss(caller.workspace_id, req.id)?))
}

/// POST /patterns/run - scan the caller's workspace now.
pub async fn patterns_run(
    State(state): State<AppState>,
    caller: AgentCaller,
) -> Result<Json<ScanReport>, ApiError> {
    ensure_workspace(&state, &caller)?;
    let report = state
        .patterns
        .scan(caller.workspace_id, folio_core::types::Timestamp::now())?;
    Ok(Json(report))
}
