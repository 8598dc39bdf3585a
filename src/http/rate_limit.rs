//! Per-client-IP rate limiting.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::config::schema::RateLimitConfig;
use crate::observability::metrics;

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// One bucket per client address.
pub struct IpRateLimiter {
    buckets: DashMap<Option<IpAddr>, TokenBucket>,
    rate: f64,
    burst: f64,
}

impl IpRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            rate: f64::from(config.requests_per_second),
            burst: f64::from(config.burst),
        }
    }

    /// Take a token for `client`. Requests without a peer address share a bucket.
    pub fn check(&self, client: Option<IpAddr>) -> bool {
        self.buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.burst, self.rate)
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Refuse requests over the client's budget with 429.
pub async fn ip_rate_limit(
    State(limiter): State<Arc<IpRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if limiter.check(client) {
        return next.run(request).await;
    }
    tracing::warn!(client = ?client, uri = %request.uri(), "Rate limit exceeded");
    metrics::record_rate_limited();
    let mut response = Response::new(Body::from("Too Many Requests"));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response
}
