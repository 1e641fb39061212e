//! Integration tests for the Folio API.
//!
//! Each test builds its own in-memory state and drives the router with
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use folio_agent::{ActorContext, ApprovalLedger, SqliteApprovalLedger};
use folio_api::create_router;
use folio_api::handlers::HealthResponse;
use folio_api::state::AppState;
use folio_core::config::FolioConfig;
use folio_storage::{Database, ResearchNode, ResearchRepository, TaskRepository, WorkspaceRepository};

// =============================================================================
// Helpers
// =============================================================================

const TEST_TOKEN: &str = "test-token-12345";

struct Fixture {
    state: AppState,
    app: axum::Router,
    workspace_id: Uuid,
    space_id: Uuid,
    user_id: Uuid,
}

fn fixture() -> Fixture {
    let db = Arc::new(Database::in_memory().unwrap());
    let state = AppState::new(FolioConfig::default(), Arc::clone(&db), None).with_token(TEST_TOKEN);
    let workspaces = WorkspaceRepository::new(db);
    let user_id = Uuid::new_v4();
    let workspace = workspaces.create_workspace("Home", Some(user_id)).unwrap();
    let space = workspaces.create_space(workspace.id, "Personal").unwrap();
    Fixture {
        app: create_router(state.clone()),
        state,
        workspace_id: workspace.id,
        space_id: space.id,
        user_id,
    }
}

impl Fixture {
    fn request(&self, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", TEST_TOKEN))
            .header("x-workspace-id", self.workspace_id.to_string())
            .header("x-user-id", self.user_id.to_string());
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.request("POST", uri, Some(body))).await
    }

    async fn enable_agent(&self) {
        let (status, _) = self
            .send(self.request(
                "PUT",
                "/agent/settings",
                Some(json!({"settings": {"enabled": true, "enableAutonomousLoop": true}})),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    fn actor(&self) -> ActorContext {
        ActorContext {
            workspace_id: self.workspace_id,
            space_id: self.space_id,
            user_id: self.user_id,
        }
    }
}

// =============================================================================
// Public endpoints and auth
// =============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let fx = fixture();
    let resp = fx
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health.status, "healthy");
    assert!(!health.generation_available);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let fx = fixture();
    let req = Request::post("/agent/loop/run")
        .header("content-type", "application/json")
        .body(Body::from(json!({"spaceId": fx.space_id}).to_string()))
        .unwrap();
    let (status, body) = fx.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_missing_caller_context_is_bad_request() {
    let fx = fixture();
    let req = Request::post("/agent/loop/run")
        .header("authorization", format!("Bearer {}", TEST_TOKEN))
        .header("content-type", "application/json")
        .body(Body::from(json!({"spaceId": fx.space_id}).to_string()))
        .unwrap();
    let (status, body) = fx.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

// =============================================================================
// Agent
// =============================================================================

#[tokio::test]
async fn test_disabled_agent_is_rejected() {
    let fx = fixture();
    let (status, body) = fx
        .post("/agent/loop/run", json!({"spaceId": fx.space_id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "agent_disabled");
}

#[tokio::test]
async fn test_loop_without_model_proposes_nothing() {
    let fx = fixture();
    fx.enable_agent().await;
    let (status, body) = fx
        .post("/agent/loop/run", json!({"spaceId": fx.space_id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], "No actions proposed.");
    assert_eq!(body["actions"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_foreign_space_is_not_found() {
    let fx = fixture();
    fx.enable_agent().await;
    let other = WorkspaceRepository::new(Arc::clone(&fx.state.database))
        .create_workspace("Other", None)
        .unwrap();
    let foreign = WorkspaceRepository::new(Arc::clone(&fx.state.database))
        .create_space(other.id, "Theirs")
        .unwrap();
    let (status, body) = fx
        .post("/agent/loop/run", json!({"spaceId": foreign.id}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_cascade_without_model_skips_every_horizon() {
    let fx = fixture();
    fx.enable_agent().await;
    let (status, body) = fx
        .post("/agent/plan/cascade", json!({"spaceId": fx.space_id, "force": true}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let horizons = body["horizons"].as_array().unwrap();
    assert_eq!(horizons.len(), 4);
    assert!(horizons.iter().all(|h| h["regenerated"] == false));
    assert!(horizons.iter().all(|h| h["reason"] == "model-unavailable"));
}

#[tokio::test]
async fn test_plan_without_model_is_empty() {
    let fx = fixture();
    fx.enable_agent().await;
    let (status, body) = fx.post("/agent/plan", json!({"spaceId": fx.space_id})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], "No actions proposed.");
}

#[tokio::test]
async fn test_approve_unknown_plan_is_not_found() {
    let fx = fixture();
    fx.enable_agent().await;
    let (status, body) = fx
        .post(
            "/agent/plan/approve",
            json!({"spaceId": fx.space_id, "planId": Uuid::new_v4()}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_schedule_run_records_cadence() {
    let fx = fixture();
    fx.enable_agent().await;
    let (status, body) = fx
        .post(
            "/agent/loop/schedule-run",
            json!({"spaceId": fx.space_id, "cadence": "daily"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cadences"], json!(["daily"]));
    assert_eq!(body["loopOutcome"]["summary"], "No actions proposed.");

    let (status, _) = fx
        .post(
            "/agent/loop/schedule-run",
            json!({"spaceId": fx.space_id, "cadence": "hourly"}),
        )
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_confirm_approval_applies_once() {
    let fx = fixture();
    fx.enable_agent().await;
    let ledger = SqliteApprovalLedger::new(Arc::clone(&fx.state.database));
    let grant = ledger
        .create_approval(
            &fx.actor(),
            "task.create",
            &json!({"title": "Call bank"}),
            "writes-disabled",
            600,
        )
        .unwrap();

    let (status, body) = fx
        .post(
            "/agent/approvals/confirm",
            json!({"spaceId": fx.space_id, "token": grant.token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "executed");
    let tasks = TaskRepository::new(Arc::clone(&fx.state.database))
        .list_for_space(fx.space_id)
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Call bank");

    let (status, body) = fx
        .post(
            "/agent/approvals/confirm",
            json!({"spaceId": fx.space_id, "token": grant.token}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_review_prompts_list_and_consume_validation() {
    let fx = fixture();
    let (status, body) = fx
        .post("/agent/review-prompts/list", json!({"spaceId": fx.space_id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prompts"], json!([]));

    let (status, _) = fx
        .post(
            "/agent/review-prompts/consume",
            json!({"spaceId": fx.space_id, "ids": []}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_handoff_and_suggestions_without_model() {
    let fx = fixture();
    fx.enable_agent().await;

    let (status, body) = fx
        .post("/agent/chat", json!({"spaceId": fx.space_id, "message": "What next?"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["generated"], false);

    let (status, body) = fx
        .post("/agent/chat", json!({"spaceId": fx.space_id, "message": "   "}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = fx
        .post("/agent/handoff", json!({"spaceId": fx.space_id, "note": "Back Monday"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["content"].as_str().unwrap().contains("Back Monday"));

    let (status, body) = fx
        .post("/agent/suggestions", json!({"spaceId": fx.space_id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["suggestions"].is_array());
}

#[tokio::test]
async fn test_settings_round_trip() {
    let fx = fixture();
    let (status, body) = fx.send(fx.request("GET", "/agent/settings", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent"]["enabled"], false);
    assert_eq!(body["patterns"]["enabled"], false);

    let (status, body) = fx
        .send(fx.request(
            "PUT",
            "/agent/settings",
            Some(json!({"settings": {"enabled": true, "patterns": {"enabled": true}}})),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent"]["enabled"], true);
    assert_eq!(body["patterns"]["enabled"], true);

    let uri = format!("/agent/settings?spaceId={}", Uuid::new_v4());
    let (status, _) = fx.send(fx.request("GET", &uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Patterns
// =============================================================================

fn seed_contradiction(fx: &Fixture) {
    let research = ResearchRepository::new(Arc::clone(&fx.state.database));
    let a = ResearchNode::new(fx.workspace_id, "claim", "Latency is IO bound");
    let b = ResearchNode::new(fx.workspace_id, "claim", "Latency is CPU bound");
    research.insert_node(&a).unwrap();
    research.insert_node(&b).unwrap();
    research.link(fx.workspace_id, a.id, b.id, "contradicts").unwrap();
}

#[tokio::test]
async fn test_pattern_run_and_lifecycle() {
    let fx = fixture();
    seed_contradiction(&fx);

    let (status, body) = fx.send(fx.request("POST", "/patterns/run", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["failedEvaluators"].as_array().unwrap().is_empty());
    // One contradiction plus two unsupported claims.
    assert_eq!(body["created"].as_array().unwrap().len(), 3);

    let (status, body) = fx.post("/patterns/list", json!({"status": "detected"})).await;
    assert_eq!(status, StatusCode::OK);
    let detections = body["detections"].as_array().unwrap();
    let contradiction = detections
        .iter()
        .find(|d| d["pattern_type"] == "contradiction")
        .unwrap();
    let id = contradiction["id"].as_str().unwrap().to_string();

    let (status, body) = fx.post("/patterns/acknowledge", json!({"id": id})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "acknowledged");

    let (status, body) = fx.post("/patterns/acknowledge", json!({"id": id})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let (status, body) = fx.post("/patterns/dismiss", json!({"id": id})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "dismissed");

    let (status, _) = fx.post("/patterns/dismiss", json!({"id": Uuid::new_v4()})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pattern_list_rejects_unknown_status() {
    let fx = fixture();
    let (status, body) = fx.post("/patterns/list", json!({"status": "reopened"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}
