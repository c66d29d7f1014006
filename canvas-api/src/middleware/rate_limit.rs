//! Per-IP request rate limiting.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::ApiConfig;
use crate::error::ApiError;

/// Checks between sweeps of idle client entries.
const PRUNE_EVERY: u64 = 1024;

/// Where the client address of a request is taken from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientIpSource {
    /// The TCP peer address only. Forwarding headers are ignored.
    #[default]
    Peer,
    /// `X-Forwarded-For`, then `X-Real-IP`, then the peer. Only correct
    /// behind a proxy that overwrites those headers.
    ForwardedHeaders,
}

impl ClientIpSource {
    pub fn from_trust(trust_forwarded_headers: bool) -> Self {
        if trust_forwarded_headers {
            ClientIpSource::ForwardedHeaders
        } else {
            ClientIpSource::Peer
        }
    }

    /// Client IP of one request.
    ///
    /// Used both for perimeter rate limiting and as the observer origin.
    pub fn resolve(self, headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
        if self == ClientIpSource::ForwardedHeaders {
            if let Some(ip) = forwarded_ip(headers) {
                return ip;
            }
        }
        peer.map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        // X-Forwarded-For can contain multiple IPs, take the first one
        if let Some(ip) = forwarded_for
            .split(',')
            .next()
            .and_then(|first| first.trim().parse().ok())
        {
            return Some(ip);
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|real_ip| real_ip.trim().parse().ok())
}

/// State for rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<ApiConfig>,
    source: ClientIpSource,
    /// One keyed limiter for every client IP
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    checks: Arc<AtomicU64>,
}

impl RateLimitState {
    pub fn new(config: Arc<ApiConfig>) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.rate_limit_burst).unwrap_or(NonZeroU32::MIN));

        Self {
            source: config.client_ip_source(),
            config,
            limiter: Arc::new(RateLimiter::keyed(quota)),
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of client IPs currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Forget clients whose quota has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    fn check(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }
        self.limiter.check_key(&ip).map_err(|not_until| {
            let retry_after = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1);
            RateLimitError { retry_after }
        })
    }
}

/// Error type for rate limit middleware.
#[derive(Debug)]
pub struct RateLimitError {
    /// Seconds until the limiter admits another request
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        ApiError::too_many_requests(Some(self.retry_after)).into_response()
    }
}

/// Rate limiting middleware.
///
/// When limited, returns 429 Too Many Requests with a Retry-After header.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.config.rate_limit_enabled {
        return Ok(next.run(request).await);
    }

    let ip = state
        .source
        .resolve(request.headers(), connect_info.map(|ConnectInfo(addr)| addr));

    if let Err(err) = state.check(ip) {
        tracing::debug!(%ip, retry_after = err.retry_after, "perimeter rate limit hit");
        return Err(err);
    }

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&state.config.rate_limit_per_minute.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-ratelimit-limit"), value);
    }
    Ok(response)
}
