//! Fixed-window rate limiting keyed by client IP and route class.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// Groups of routes that share a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Signup, login, token and email flows
    Auth,
    /// Contacts, avatar and admin endpoints
    Api,
    /// `/users/me`
    Profile,
}

#[derive(Debug, Clone)]
struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// Thread-safe rate limiter using dashmap
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<(IpAddr, RouteClass), WindowCounter>,
    config: RateLimitConfig,
    window_duration: Duration,
}

/// Information about rate limit status
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: DashMap::new(),
            window_duration: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    pub fn limit_for(&self, class: RouteClass) -> u32 {
        match class {
            RouteClass::Auth => self.config.auth_requests_per_window,
            RouteClass::Api => self.config.api_requests_per_window,
            RouteClass::Profile => self.config.profile_requests_per_window,
        }
    }

    /// Counts the request and decides. Returns `Err(retry_after_secs)` when the
    /// window is exhausted.
    pub fn check(&self, ip: IpAddr, class: RouteClass) -> Result<RateLimitInfo, u64> {
        self.check_at(ip, class, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, class: RouteClass, now: Instant) -> Result<RateLimitInfo, u64> {
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                remaining: u32::MAX,
                limit: u32::MAX,
                reset_after: 0,
            });
        }

        let limit = self.limit_for(class);

        // the entry guard holds the shard lock for the whole read-modify-write
        let mut entry = self.entries.entry((ip, class)).or_insert_with(|| WindowCounter {
            count: 0,
            window_start: now,
        });

        let mut elapsed = now.saturating_duration_since(entry.window_start);
        if elapsed >= self.window_duration {
            entry.count = 0;
            entry.window_start = now;
            elapsed = Duration::ZERO;
        }
        let reset_after = self.window_duration.saturating_sub(elapsed).as_secs().max(1);

        if entry.count < limit {
            entry.count += 1;
            Ok(RateLimitInfo {
                remaining: limit - entry.count,
                limit,
                reset_after,
            })
        } else {
            Err(reset_after)
        }
    }

    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let expiry = self.window_duration * 2;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.window_start) < expiry);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn client_ip(&self, request: &Request<Body>) -> IpAddr {
        if self.config.trust_proxy_headers {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return ip;
            }
            let real_ip = request
                .headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
            if let Some(ip) = real_ip {
                return ip;
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

pub async fn rate_limit_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_class(state, request, next, RouteClass::Auth).await
}

pub async fn rate_limit_api(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_class(state, request, next, RouteClass::Api).await
}

pub async fn rate_limit_profile(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_class(state, request, next, RouteClass::Profile).await
}

async fn rate_limit_with_class(
    state: AppState,
    request: Request<Body>,
    next: Next,
    class: RouteClass,
) -> Response {
    let limiter = &state.rate_limiter;
    let ip = limiter.client_ip(&request);

    match limiter.check(ip, class) {
        Ok(info) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            for (name, value) in [
                ("x-ratelimit-limit", info.limit as u64),
                ("x-ratelimit-remaining", info.remaining as u64),
                ("x-ratelimit-reset", info.reset_after),
            ] {
                if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
                    headers.insert(name, v);
                }
            }
            response
        }
        Err(retry_after) => {
            tracing::warn!(%ip, class = ?class, retry_after, "rate limit exceeded");
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                entries = rate_limiter.entry_count(),
                "rate limiter cleanup complete"
            );
        }
    });
}
