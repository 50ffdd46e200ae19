use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::services::AppState;

const TAKE_RATE_LIMIT_PER_IP: u32 = 120; // requests per minute
const AUTHORING_RATE_LIMIT_PER_IP: u32 = 300;
const RATE_WINDOW_SECONDS: u64 = 60;

/// Best-effort client IP. Preferred order: X-Forwarded-For, Forwarded,
/// X-Real-IP, ConnectInfo.
pub fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            // x-forwarded-for can be a comma separated list; take first
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            // forwarded: for=1.2.3.4; proto=http; by=...
            for part in s.split(';') {
                let p = part.trim();
                if p.starts_with("for=") {
                    return p.trim_start_matches("for=").trim().trim_matches('"').to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

fn rate_limit_disabled() -> bool {
    std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1"
}

/// Per-IP rate limit on the public survey-taking endpoints. The window
/// counter lives in the session cache so all API replicas share it.
pub async fn take_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if rate_limit_disabled() {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());

    let ip_limit = std::env::var("RATE_LIMIT_PER_IP")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(TAKE_RATE_LIMIT_PER_IP);

    let allowed = state
        .cache
        .incr_window(
            &format!("ratelimit:take:{}", client_ip),
            ip_limit,
            RATE_WINDOW_SECONDS,
        )
        .await
        .map_err(|e| {
            tracing::error!("Rate limit check failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if !allowed {
        tracing::warn!("Take rate limit exceeded for IP: {}", client_ip);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

/// Looser per-IP limit for the authoring endpoints.
pub async fn authoring_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if rate_limit_disabled() {
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());

    let ip_limit = std::env::var("RATE_LIMIT_AUTHORING_PER_IP")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(AUTHORING_RATE_LIMIT_PER_IP);

    let allowed = state
        .cache
        .incr_window(
            &format!("ratelimit:authoring:{}", client_ip),
            ip_limit,
            RATE_WINDOW_SECONDS,
        )
        .await
        .map_err(|e| {
            tracing::error!("Rate limit check failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if !allowed {
        tracing::warn!("Authoring rate limit exceeded for IP: {}", client_ip);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}
