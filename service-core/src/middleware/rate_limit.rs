//! Per-client admission control.
//!
//! Both backends implement GCRA keyed purely by client identity. The key never
//! embeds wall-clock time: a time-derived key would hand every caller a fresh
//! bucket each second and nothing would ever be throttled.
//!
//! The client is the socket peer. `x-forwarded-for` is only read when the peer
//! is a configured trusted proxy, and then the right-most untrusted hop wins.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter as GovernorLimiter,
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DashMapStateStore,
};
use once_cell::sync::Lazy;
use redis::{Script, aio::ConnectionManager};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use thiserror::Error;

use crate::error::{AppError, RATE_LIMIT_REMAINING_HEADER};

/// Namespace for limiter state in the shared store.
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit";

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after: Duration,
}

impl RateLimitDecision {
    pub fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: Duration::ZERO,
        }
    }

    pub fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after,
        }
    }

    /// Whole seconds rounded up; a denial never reports less than one second.
    pub fn retry_after_secs(&self) -> u64 {
        if self.allowed {
            return 0;
        }
        let millis = self.retry_after.as_millis().div_ceil(1000);
        u64::try_from(millis).unwrap_or(u64::MAX).max(1)
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limit store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("invalid rate limit quota: {0}")]
    InvalidQuota(String),
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

/// Steady-state rate: `capacity` requests per `window`, with a burst of `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    capacity: u32,
    window: Duration,
}

impl RateQuota {
    pub fn new(capacity: u32, window: Duration) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::InvalidQuota(
                "capacity must be greater than 0".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(RateLimitError::InvalidQuota(
                "window must be greater than 0".to_string(),
            ));
        }
        Ok(Self { capacity, window })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn emission_interval(&self) -> Duration {
        self.window / self.capacity
    }

    fn governor_quota(&self) -> Result<Quota, RateLimitError> {
        let burst = NonZeroU32::new(self.capacity).ok_or_else(|| {
            RateLimitError::InvalidQuota("capacity must be greater than 0".to_string())
        })?;
        let quota = Quota::with_period(self.emission_interval()).ok_or_else(|| {
            RateLimitError::InvalidQuota("emission interval rounds to zero".to_string())
        })?;
        Ok(quota.allow_burst(burst))
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn admit(&self, client_key: &str) -> Result<RateLimitDecision, RateLimitError>;
}

pub type SharedRateLimiter = Arc<dyn RateLimiter>;

/// Tracked keys before the in-process limiter first sweeps idle clients.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 10_000;

/// In-process keyed GCRA limiter.
///
/// Keys whose bucket has fully refilled are swept once the map grows past the
/// prune threshold, so the map stays bounded by the recently active clients.
pub struct GovernorRateLimiter<C = DefaultClock>
where
    C: Clock,
{
    limiter: GovernorLimiter<String, DashMapStateStore<String>, C, StateInformationMiddleware>,
    clock: C,
    prune_threshold: usize,
    prune_at: AtomicUsize,
}

impl GovernorRateLimiter<DefaultClock> {
    pub fn new(quota: RateQuota) -> Result<Self, RateLimitError> {
        Self::with_clock(quota, DefaultClock::default())
    }
}

impl<C> GovernorRateLimiter<C>
where
    C: Clock,
{
    pub fn with_clock(quota: RateQuota, clock: C) -> Result<Self, RateLimitError> {
        let limiter = GovernorLimiter::dashmap_with_clock(quota.governor_quota()?, &clock)
            .with_middleware::<StateInformationMiddleware>();
        Ok(Self {
            limiter,
            clock,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            prune_at: AtomicUsize::new(DEFAULT_PRUNE_THRESHOLD),
        })
    }

    pub fn with_prune_threshold(mut self, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        self.prune_threshold = threshold;
        self.prune_at = AtomicUsize::new(threshold);
        self
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }

    fn prune_idle_keys(&self) {
        if self.limiter.len() < self.prune_at.load(Ordering::Relaxed) {
            return;
        }
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();

        // Next sweep waits until the live set doubles.
        let kept = self.limiter.len();
        self.prune_at.store(
            kept.saturating_mul(2).max(self.prune_threshold),
            Ordering::Relaxed,
        );
        tracing::debug!(kept, "Pruned idle rate limit keys");
    }

    pub fn check(&self, client_key: &str) -> RateLimitDecision {
        self.prune_idle_keys();
        match self.limiter.check_key(&client_key.to_string()) {
            Ok(snapshot) => RateLimitDecision::allow(snapshot.remaining_burst_capacity()),
            Err(negative) => RateLimitDecision::deny(negative.wait_time_from(self.clock.now())),
        }
    }
}

#[async_trait]
impl<C> RateLimiter for GovernorRateLimiter<C>
where
    C: Clock + Send + Sync + 'static,
    C::Instant: Send + Sync,
{
    async fn admit(&self, client_key: &str) -> Result<RateLimitDecision, RateLimitError> {
        Ok(self.check(client_key))
    }
}

// GCRA over a single TAT value per key. The read-modify-write runs inside the
// script, so Redis serializes concurrent callers for the same key.
const GCRA_LUA: &str = r#"
redis.replicate_commands()

local rate_limit_key = KEYS[1]
local burst = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local period = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local emission_interval = period / rate
local increment = emission_interval * cost
local burst_offset = emission_interval * burst

local jan_1_2017 = 1483228800
local now = redis.call("TIME")
now = (now[1] - jan_1_2017) + (now[2] / 1000000)

local tat = redis.call("GET", rate_limit_key)
if not tat then
  tat = now
else
  tat = tonumber(tat)
end
tat = math.max(tat, now)

local new_tat = tat + increment
local allow_at = new_tat - burst_offset
local diff = now - allow_at
local remaining = diff / emission_interval

if remaining < 0 then
  local reset_after = tat - now
  local retry_after = diff * -1
  return {0, 0, tostring(retry_after), tostring(reset_after)}
end

local reset_after = new_tat - now
if reset_after > 0 then
  redis.call("SET", rate_limit_key, new_tat, "EX", math.ceil(reset_after))
end
return {cost, math.floor(remaining), "-1", tostring(reset_after)}
"#;

static GCRA_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(GCRA_LUA));

/// GCRA limiter whose state lives in Redis, shared by every replica.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    quota: RateQuota,
    timeout: Duration,
}

impl RedisRateLimiter {
    pub fn new(conn: ConnectionManager, quota: RateQuota, timeout: Duration) -> Self {
        Self {
            conn,
            quota,
            timeout,
        }
    }

    fn key(client_key: &str) -> String {
        format!("{}:{}", RATE_LIMIT_KEY_PREFIX, client_key)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn admit(&self, client_key: &str) -> Result<RateLimitDecision, RateLimitError> {
        let mut conn = self.conn.clone();
        let mut invocation = GCRA_SCRIPT.key(Self::key(client_key));
        invocation
            .arg(self.quota.capacity())
            .arg(self.quota.capacity())
            .arg(self.quota.window().as_secs_f64())
            .arg(1);

        let reply: (i64, i64, String, String) =
            tokio::time::timeout(self.timeout, invocation.invoke_async(&mut conn))
                .await
                .map_err(|_| RateLimitError::Timeout(self.timeout))??;

        let (allowed, remaining, retry_after, _reset_after) = reply;
        if allowed > 0 {
            return Ok(RateLimitDecision::allow(
                u32::try_from(remaining.max(0)).unwrap_or(u32::MAX),
            ));
        }

        let retry_after = retry_after.parse::<f64>().unwrap_or(0.0).max(0.0);
        Ok(RateLimitDecision::deny(Duration::from_secs_f64(retry_after)))
    }
}

/// Rate limiter plus the proxies allowed to speak for a client.
#[derive(Clone)]
pub struct AdmissionControl {
    limiter: SharedRateLimiter,
    trusted_proxies: Arc<[IpAddr]>,
}

impl AdmissionControl {
    pub fn new(limiter: SharedRateLimiter, trusted_proxies: Vec<IpAddr>) -> Self {
        let trusted_proxies: Vec<IpAddr> = trusted_proxies
            .into_iter()
            .map(|ip| ip.to_canonical())
            .collect();
        Self {
            limiter,
            trusted_proxies: trusted_proxies.into(),
        }
    }

    pub fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        client_ip(request, &self.trusted_proxies)
    }
}

/// Client identity for admission control.
///
/// The peer address, unless the peer is a trusted proxy: then the right-most
/// `x-forwarded-for` hop that is not itself trusted. A malformed chain falls
/// back to the peer.
pub fn client_ip(request: &Request, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical())?;

    if !trusted_proxies.contains(&peer) {
        return Some(peer);
    }

    for value in request.headers().get_all("x-forwarded-for").iter().rev() {
        let Ok(value) = value.to_str() else {
            return Some(peer);
        };
        for hop in value.rsplit(',') {
            match hop.trim().parse::<IpAddr>().map(|ip| ip.to_canonical()) {
                Ok(ip) if trusted_proxies.contains(&ip) => continue,
                Ok(ip) => return Some(ip),
                Err(_) => return Some(peer),
            }
        }
    }
    Some(peer)
}

/// Middleware for IP-keyed admission control.
pub async fn rate_limit_middleware(
    State(admission): State<AdmissionControl>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ip) = admission.client_ip(&request) else {
        tracing::warn!("Could not determine client IP for rate limiting");
        return Ok(next.run(request).await);
    };
    let client_key = ip.to_string();

    let decision = admission.limiter.admit(&client_key).await.map_err(|e| {
        tracing::error!(client_key = %client_key, error = %e, "Rate limit check failed");
        AppError::from(e)
    })?;

    if !decision.allowed {
        tracing::warn!(
            client_key = %client_key,
            retry_after_secs = decision.retry_after_secs(),
            "Rate limit exceeded"
        );
        return Err(AppError::TooManyRequests(
            "Too many requests from this IP. Please try again later.".to_string(),
            Some(decision.retry_after_secs()),
        ));
    }

    tracing::debug!(remaining = decision.remaining, "Rate limit remaining");

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(decision.remaining),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
    };
    use governor::clock::FakeRelativeClock;
    use tower::ServiceExt;

    fn quota(capacity: u32, window_secs: u64) -> RateQuota {
        RateQuota::new(capacity, Duration::from_secs(window_secs)).unwrap()
    }

    #[test]
    fn test_quota_rejects_zero_values() {
        assert!(RateQuota::new(0, Duration::from_secs(1)).is_err());
        assert!(RateQuota::new(5, Duration::ZERO).is_err());
    }

    #[test]
    fn test_denies_after_capacity_and_recovers_after_retry_after() {
        let clock = FakeRelativeClock::default();
        let limiter = GovernorRateLimiter::with_clock(quota(3, 60), clock.clone()).unwrap();

        let first = limiter.check("10.0.0.1");
        let second = limiter.check("10.0.0.1");
        let third = limiter.check("10.0.0.1");
        assert!(first.allowed && second.allowed && third.allowed);
        assert!(first.remaining > third.remaining);

        let denied = limiter.check("10.0.0.1");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after > Duration::ZERO);
        assert!(denied.retry_after <= Duration::from_secs(20));
        assert!(denied.retry_after_secs() >= 1);

        clock.advance(denied.retry_after);
        assert!(limiter.check("10.0.0.1").allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = FakeRelativeClock::default();
        let limiter = GovernorRateLimiter::with_clock(quota(1, 60), clock).unwrap();

        assert!(limiter.check("10.0.0.1").allowed);
        assert!(!limiter.check("10.0.0.1").allowed);
        assert!(limiter.check("10.0.0.2").allowed);
    }

    #[test]
    fn test_same_key_stays_limited_across_seconds() {
        let clock = FakeRelativeClock::default();
        let limiter = GovernorRateLimiter::with_clock(quota(2, 60), clock.clone()).unwrap();

        assert!(limiter.check("10.0.0.9").allowed);
        assert!(limiter.check("10.0.0.9").allowed);
        clock.advance(Duration::from_secs(1));
        assert!(!limiter.check("10.0.0.9").allowed);
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        let decision = RateLimitDecision::deny(Duration::from_millis(1200));
        assert_eq!(decision.retry_after_secs(), 2);
        let decision = RateLimitDecision::deny(Duration::from_millis(10));
        assert_eq!(decision.retry_after_secs(), 1);
        assert_eq!(RateLimitDecision::allow(4).retry_after_secs(), 0);
    }

    #[test]
    fn test_idle_keys_are_pruned_past_threshold() {
        let clock = FakeRelativeClock::default();
        let limiter = GovernorRateLimiter::with_clock(quota(1, 60), clock.clone())
            .unwrap()
            .with_prune_threshold(3);

        for key in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            assert!(limiter.check(key).allowed);
        }
        assert_eq!(limiter.tracked_keys(), 3);

        clock.advance(Duration::from_secs(120));
        assert!(limiter.check("10.0.0.4").allowed);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_pruning_keeps_limited_keys() {
        let clock = FakeRelativeClock::default();
        let limiter = GovernorRateLimiter::with_clock(quota(1, 60), clock)
            .unwrap()
            .with_prune_threshold(2);

        assert!(limiter.check("10.0.0.1").allowed);
        assert!(limiter.check("10.0.0.2").allowed);
        assert!(limiter.check("10.0.0.3").allowed);
        assert_eq!(limiter.tracked_keys(), 3);
        assert!(!limiter.check("10.0.0.1").allowed);
    }

    fn from_peer(peer: [u8; 4], forwarded: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .uri("/")
            .extension(ConnectInfo(SocketAddr::from((peer, 9000))));
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_client_ip_ignores_forwarded_header_from_untrusted_peer() {
        let request = from_peer([192, 0, 2, 10], Some("203.0.113.7"));
        assert_eq!(client_ip(&request, &[]), Some(ip("192.0.2.10")));
        assert_eq!(
            client_ip(&request, &[ip("10.0.0.1")]),
            Some(ip("192.0.2.10"))
        );

        let request = from_peer([192, 0, 2, 10], None);
        assert_eq!(client_ip(&request, &[]), Some(ip("192.0.2.10")));
    }

    #[test]
    fn test_client_ip_takes_rightmost_untrusted_hop_behind_proxy() {
        let trusted = [ip("10.0.0.1"), ip("10.0.0.2")];

        let request = from_peer([10, 0, 0, 1], Some("198.51.100.9, 203.0.113.7, 10.0.0.2"));
        assert_eq!(client_ip(&request, &trusted), Some(ip("203.0.113.7")));

        let request = from_peer([10, 0, 0, 1], Some("10.0.0.2"));
        assert_eq!(client_ip(&request, &trusted), Some(ip("10.0.0.1")));

        let request = from_peer([10, 0, 0, 1], Some("203.0.113.7, not-an-ip"));
        assert_eq!(client_ip(&request, &trusted), Some(ip("10.0.0.1")));

        let request = from_peer([10, 0, 0, 1], None);
        assert_eq!(client_ip(&request, &trusted), Some(ip("10.0.0.1")));
    }

    #[test]
    fn test_client_ip_reads_the_last_forwarded_header_first() {
        let request = HttpRequest::builder()
            .uri("/")
            .header("x-forwarded-for", "198.51.100.9")
            .header("x-forwarded-for", "203.0.113.7")
            .extension(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 9000))))
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            client_ip(&request, &[ip("10.0.0.1")]),
            Some(ip("203.0.113.7"))
        );
    }

    #[test]
    fn test_client_ip_requires_a_peer() {
        let request = HttpRequest::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request, &[ip("10.0.0.1")]), None);
    }

    fn app(limiter: SharedRateLimiter, trusted_proxies: Vec<IpAddr>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(
                AdmissionControl::new(limiter, trusted_proxies),
                rate_limit_middleware,
            ))
    }

    #[tokio::test]
    async fn test_middleware_throttles_with_headers() {
        let limiter: SharedRateLimiter = Arc::new(GovernorRateLimiter::new(quota(1, 60)).unwrap());
        let app = app(limiter, Vec::new());

        let response = app.clone().oneshot(from_peer([198, 51, 100, 1], None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(RATE_LIMIT_REMAINING_HEADER));

        let response = app.clone().oneshot(from_peer([198, 51, 100, 1], None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[axum::http::header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 1);
        assert_eq!(response.headers()[RATE_LIMIT_REMAINING_HEADER], "0");

        let response = app.oneshot(from_peer([198, 51, 100, 2], None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_ignores_rotating_forwarded_header() {
        let limiter: SharedRateLimiter = Arc::new(GovernorRateLimiter::new(quota(1, 60)).unwrap());
        let app = app(limiter, Vec::new());

        let response = app
            .clone()
            .oneshot(from_peer([198, 51, 100, 1], Some("203.0.113.1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(from_peer([198, 51, 100, 1], Some("203.0.113.2")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_middleware_passes_unidentified_clients() {
        let limiter: SharedRateLimiter = Arc::new(GovernorRateLimiter::new(quota(1, 60)).unwrap());
        let app = app(limiter, Vec::new());

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
