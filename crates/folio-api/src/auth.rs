//! API authentication and caller context.
//!
//! Protected routes require `Authorization: Bearer <token>`. Agent and
//! pattern routes additionally need the caller's workspace and user, read
//! from the `x-workspace-id` and `x-user-id` headers.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::Rng;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const WORKSPACE_HEADER: &str = "x-workspace-id";
pub const USER_HEADER: &str = "x-user-id";

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

/// Load token from file, or generate and save a new one.
pub fn load_or_generate_token(token_path: &std::path::Path) -> String {
    if let Ok(contents) = std::fs::read_to_string(token_path) {
        let token = contents.trim().to_string();
        if !token.is_empty() {
            tracing::info!("API token loaded from {}", token_path.display());
            return token;
        }
    }

    let token = generate_token();

    if let Some(parent) = token_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(token_path, &token) {
        tracing::warn!(error = %e, "Failed to save API token to {}", token_path.display());
    } else {
        // Owner-only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(token_path, std::fs::Permissions::from_mode(0o600));
        }
        tracing::info!("API token saved to {}", token_path.display());
    }

    token
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "unauthorized",
            "message": message
        })),
    )
        .into_response()
}

/// Middleware that validates Bearer token authentication.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(value) = req.headers().get("authorization") else {
        return unauthorized("Missing Authorization header");
    };
    let Ok(value) = value.to_str() else {
        return unauthorized("Invalid Authorization header encoding");
    };
    match value.strip_prefix("Bearer ") {
        Some(token) if token == state.api_token => next.run(req).await,
        _ => unauthorized("Invalid bearer token"),
    }
}

/// Workspace and user the request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentCaller {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
}

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid, ApiError> {
    let raw = parts
        .headers
        .get(name)
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {} header", name)))?;
    raw.to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {} header", name)))
}

impl<S: Send + Sync> FromRequestParts<S> for AgentCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            workspace_id: header_uuid(parts, WORKSPACE_HEADER)?,
            user_id: header_uuid(parts, USER_HEADER)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_token_persisted_and_reloaded() {
        let dir = std::env::temp_dir().join(format!("folio-token-{}", Uuid::new_v4()));
        let path = dir.join("api_token");
        let first = load_or_generate_token(&path);
        assert_eq!(load_or_generate_token(&path), first);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_caller_from_headers() {
        let ws = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (mut parts, _) = axum::http::Request::builder()
            .header(WORKSPACE_HEADER, ws.to_string())
            .header(USER_HEADER, user.to_string())
            .body(())
            .unwrap()
            .into_parts();
        let caller = AgentCaller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(caller, AgentCaller { workspace_id: ws, user_id: user });

        let (mut parts, _) = axum::http::Request::builder()
            .header(WORKSPACE_HEADER, "not-a-uuid")
            .body(())
            .unwrap()
            .into_parts();
        assert!(matches!(
            AgentCaller::from_request_parts(&mut parts, &()).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
