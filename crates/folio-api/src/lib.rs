//! Folio API crate - axum HTTP server, route handlers, SSE event stream.
//!
//! Exposes the agent pipeline (chat, planning, loop runs, approvals,
//! review prompts, settings) and the pattern engine over JSON endpoints
//! scoped by the caller's workspace.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use auth::AgentCaller;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
