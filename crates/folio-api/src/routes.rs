//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use folio_core::error::FolioError;

use crate::auth::{USER_HEADER, WORKSPACE_HEADER};
use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

const REQUESTS_PER_SECOND: u64 = 100;

fn local_origins(port: u16) -> Vec<HeaderValue> {
    let dev_port = port.saturating_add(1);
    [port, dev_port]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(local_origins(state.config.general.port)))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(WORKSPACE_HEADER),
            HeaderName::from_static(USER_HEADER),
        ]);

    let public_routes = Router::new().route("/health", get(handlers::health));

    let limiter = RateLimiter::new(REQUESTS_PER_SECOND);

    let rate_limited_routes = Router::new()
        .route("/agent/chat", post(handlers::chat))
        .route("/agent/plan", post(handlers::plan))
        .route("/agent/plan/cascade", post(handlers::plan_cascade))
        .route("/agent/plan/approve", post(handlers::plan_approve))
        .route("/agent/plan/reject", post(handlers::plan_reject))
        .route("/agent/loop/run", post(handlers::loop_run))
        .route("/agent/loop/schedule-run", post(handlers::loop_schedule_run))
        .route("/agent/handoff", post(handlers::handoff))
        .route("/agent/review-prompts/list", post(handlers::review_prompts_list))
        .route(
            "/agent/review-prompts/consume",
            post(handlers::review_prompts_consume),
        )
        .route("/agent/suggestions", post(handlers::suggestions))
        .route("/agent/approvals/confirm", post(handlers::approvals_confirm))
        .route(
            "/agent/settings",
            get(handlers::get_settings)
                .put(handlers::update_settings)
                .layer(DefaultBodyLimit::max(64 * 1024)),
        )
        .route("/patterns/list", post(handlers::patterns_list))
        .route("/patterns/acknowledge", post(handlers::patterns_acknowledge))
        .route("/patterns/dismiss", post(handlers::patterns_dismiss))
        .route("/patterns/run", post(handlers::patterns_run))
        .layer(axum::middleware::from_fn(
            crate::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::Extension(limiter));

    // SSE stream exempt from rate limiting.
    let stream_routes = Router::new().route("/events/stream", get(handlers::stream));

    let protected_routes = rate_limited_routes.merge(stream_routes).route_layer(
        axum::middleware::from_fn_with_state(state.clone(), crate::auth::require_auth),
    );

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on 127.0.0.1 until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), FolioError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = format!("127.0.0.1:{}", state.config.general.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
