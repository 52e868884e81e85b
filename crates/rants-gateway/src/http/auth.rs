//! Bearer-token tenant resolution and the per-tenant token bucket.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::config::RateLimitConfig;

pub const ANONYMOUS_TENANT: &str = "anonymous";

/// Resolve the tenant for a request, or produce the 401 that ends it.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, Response> {
    if !state.config.auth.enabled {
        return Ok(ANONYMOUS_TENANT.to_string());
    }

    let Some(api_key) = extract_api_key(headers) else {
        return Err(unauthorized("missing API key"));
    };
    state
        .config
        .auth
        .api_keys
        .iter()
        .find(|entry| entry.key == api_key)
        .map(|entry| entry.tenant_id.clone())
        .ok_or_else(|| unauthorized("invalid API key"))
}

/// Token-bucket admission; denial carries `Retry-After`.
pub fn check_rate_limit(state: &AppState, tenant_id: &str) -> Result<(), Response> {
    if !state.config.rate_limits.enabled {
        return Ok(());
    }
    if state.limiter.allow(tenant_id) {
        return Ok(());
    }
    let body = json!({
        "error": {
            "message": "rate limit exceeded",
            "type": "rate_limited",
            "code": "rate_limited",
        }
    });
    Err((
        StatusCode::TOO_MANY_REQUESTS,
        [("retry-after", state.limiter.retry_after_seconds().to_string())],
        Json(body),
    )
        .into_response())
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let raw = headers
        .get("authorization")
        .or_else(|| headers.get("x-api-key"))?
        .to_str()
        .ok()?;
    let raw = raw.trim();
    if let Some(token) = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
    {
        return Some(token.trim().to_string());
    }
    Some(raw.to_string())
}

fn unauthorized(message: &str) -> Response {
    let body = json!({
        "error": {
            "message": message,
            "type": "bad_request",
            "code": "unauthorized",
        }
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Process-wide token bucket keyed by tenant. Refill is continuous at
/// `requests_per_minute / 60` tokens per second up to `burst`.
pub struct RateLimiter {
    rate_per_second: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, (f64, Instant)>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            rate_per_second: f64::from(config.requests_per_minute.max(1)) / 60.0,
            capacity: f64::from(config.burst.max(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(buckets) => buckets,
            Err(_) => return true,
        };
        let (tokens, last_seen) = buckets
            .get(key)
            .copied()
            .unwrap_or((self.capacity, now));
        let tokens = (tokens + now.duration_since(last_seen).as_secs_f64() * self.rate_per_second)
            .min(self.capacity);
        if tokens < 1.0 {
            buckets.insert(key.to_string(), (tokens, now));
            return false;
        }
        buckets.insert(key.to_string(), (tokens - 1.0, now));
        true
    }

    pub fn retry_after_seconds(&self) -> u64 {
        (1.0 / self.rate_per_second).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests_per_minute: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_minute,
            burst,
        })
    }

    #[test]
    fn burst_is_honored_then_denied() {
        let limiter = limiter(60, 3);
        assert!(limiter.allow("tenant-a"));
        assert!(limiter.allow("tenant-a"));
        assert!(limiter.allow("tenant-a"));
        assert!(!limiter.allow("tenant-a"));
    }

    #[test]
    fn tenants_have_independent_buckets() {
        let limiter = limiter(60, 1);
        assert!(limiter.allow("tenant-a"));
        assert!(!limiter.allow("tenant-a"));
        assert!(limiter.allow("tenant-b"));
    }

    #[test]
    fn retry_after_reflects_refill_rate() {
        assert_eq!(limiter(60, 1).retry_after_seconds(), 1);
        assert_eq!(limiter(12, 1).retry_after_seconds(), 5);
    }
}
