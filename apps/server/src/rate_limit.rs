//! Per-IP sliding-window rate limiting, one tier per route group.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

// ── Tiers ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Read-only public endpoints.
    Public,
    /// Authenticated account/booking-management endpoints.
    Account,
    /// Booking creation, strictest.
    Booking,
    /// Admin dashboard endpoints.
    Admin,
}

impl Tier {
    /// (max requests, window) for this tier.
    fn limit(self) -> (u32, Duration) {
        match self {
            Tier::Public => (60, Duration::from_secs(60)),
            Tier::Account => (30, Duration::from_secs(60)),
            Tier::Booking => (5, Duration::from_secs(300)),
            Tier::Admin => (120, Duration::from_secs(60)),
        }
    }
}

// ── Limiter ──

/// Request timestamps per (tier, client IP).
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    hits: Arc<DashMap<(Tier, IpAddr), Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a request against the tier's window.
    ///
    /// Returns `Err(retry_after_secs)` when the limit is exceeded.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        let (max_requests, window) = tier.limit();
        let now = Instant::now();
        let window_start = now - window;

        let mut timestamps = self.hits.entry((tier, ip)).or_default();
        timestamps.retain(|t| *t > window_start);

        if timestamps.len() >= max_requests as usize {
            let oldest = timestamps[0];
            let retry_after = (oldest + window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        timestamps.push(now);
        Ok(())
    }

    /// Drop entries idle for longer than 2× their tier window.
    /// Call periodically from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|(tier, _), timestamps| {
            let cutoff = tier.limit().1 * 2;
            timestamps.retain(|t| now.duration_since(*t) < cutoff);
            !timestamps.is_empty()
        });
    }
}

// ── IP extraction ──

/// Client IP from X-Forwarded-For (reverse proxy) or the socket address.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests. Try again in {} seconds",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

// ── Middleware (one per tier) ──

async fn enforce(
    limiter: RateLimiter,
    tier: Tier,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check(tier, ip).map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

pub async fn rate_limit_public(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Public, req, next).await
}

pub async fn rate_limit_account(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Account, req, next).await
}

pub async fn rate_limit_booking(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Booking, req, next).await
}

pub async fn rate_limit_admin(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Admin, req, next).await
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_allows_under_limit() {
        let limiter = RateLimiter::new();
        let ip = test_ip(1);
        for _ in 0..5 {
            assert!(limiter.check(Tier::Booking, ip).is_ok());
        }
    }

    #[test]
    fn test_rejects_over_limit() {
        let limiter = RateLimiter::new();
        let ip = test_ip(1);
        for _ in 0..5 {
            limiter.check(Tier::Booking, ip).unwrap();
        }
        let retry_after = limiter.check(Tier::Booking, ip).unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 300);
    }

    #[test]
    fn test_ips_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(Tier::Booking, test_ip(1)).unwrap();
        }
        assert!(limiter.check(Tier::Booking, test_ip(1)).is_err());
        assert!(limiter.check(Tier::Booking, test_ip(2)).is_ok());
    }

    #[test]
    fn test_tiers_are_independent() {
        let limiter = RateLimiter::new();
        let ip = test_ip(1);
        for _ in 0..5 {
            limiter.check(Tier::Booking, ip).unwrap();
        }
        assert!(limiter.check(Tier::Booking, ip).is_err());
        assert!(limiter.check(Tier::Public, ip).is_ok());
    }

    #[test]
    fn test_cleanup_preserves_active_entries() {
        let limiter = RateLimiter::new();
        let ip = test_ip(1);
        for _ in 0..5 {
            limiter.check(Tier::Booking, ip).unwrap();
        }
        limiter.cleanup();
        // Entries are fresh, so the limit must still be enforced.
        assert!(limiter.check(Tier::Booking, ip).is_err());
    }
}
