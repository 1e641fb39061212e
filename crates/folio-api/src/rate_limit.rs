//! Fixed-window rate limiter middleware.
//!
//! Counts requests per wall-clock second and rejects the excess with 429.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Extension, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Clone)]
pub struct RateLimiter {
    max_per_sec: u64,
    count: Arc<AtomicU64>,
    /// Epoch second of the current window.
    window: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec,
            count: Arc::new(AtomicU64::new(0)),
            window: Arc::new(AtomicU64::new(0)),
        }
    }

    fn try_acquire(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(now)
    }

    fn try_acquire_at(&self, second: u64) -> bool {
        if self.window.swap(second, Ordering::Relaxed) != second {
            self.count.store(1, Ordering::Relaxed);
            return self.max_per_sec > 0;
        }
        self.count.fetch_add(1, Ordering::Relaxed) < self.max_per_sec
    }
}

pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        next.run(req).await
    } else {
        tracing::debug!("Rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "too_many_requests",
                "message": "Rate limit exceeded"
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_limit_and_reset() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire_at(100));
        assert!(limiter.try_acquire_at(100));
        assert!(!limiter.try_acquire_at(100));
        assert!(limiter.try_acquire_at(101));
    }
}
