//! Sliding-window admission control keyed by caller identity.
//!
//! Each identity owns a queue of admission instants. A check prunes instants that fell out of
//! the trailing window, compares the remainder against the ceiling, and records the new
//! admission. The whole sequence runs under the map entry's write guard, so two concurrent
//! requests for the same key cannot both take the last slot.

use crate::error::ServiceError;
use axum::http::HeaderMap;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Header carrying the caller credential; doubles as the preferred limiter identity.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Proxy chain header consulted when no credential is present.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Per-identity sliding-window rate limiter.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    buckets: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting `limit` requests per identity per minute.
    pub fn new(limit: usize) -> Self {
        Self::with_window(limit, DEFAULT_WINDOW)
    }

    /// Limiter with an explicit window length.
    pub fn with_window(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: DashMap::new(),
        }
    }

    /// Configured ceiling per window.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admit or reject one request for `key` at the current instant.
    pub fn check(&self, key: &str) -> Result<(), ServiceError> {
        self.check_at(key, Instant::now())
    }

    /// Admit or reject one request for `key` as of `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), ServiceError> {
        let mut bucket = self.buckets.entry(key.to_string()).or_default();
        prune(&mut bucket, now, self.window);

        if bucket.len() >= self.limit {
            tracing::warn!(limit = self.limit, tracked = bucket.len(), "Rate limit exceeded");
            return Err(ServiceError::RateLimitExceeded { limit: self.limit });
        }

        bucket.push_back(now);
        Ok(())
    }

    /// Drop expired instants everywhere and forget identities with nothing left in the window.
    ///
    /// Returns the number of identities removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            prune(bucket, now, self.window);
            !bucket.is_empty()
        });
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "Swept idle rate-limit buckets");
        }
        removed
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }
}

fn prune(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(window_start) = now.checked_sub(window) else {
        return;
    };
    while bucket.front().is_some_and(|admitted| *admitted <= window_start) {
        bucket.pop_front();
    }
}

/// Derive the limiter identity for a request.
///
/// Priority: caller credential, then the first address of the forwarded-for chain, then the
/// direct peer address.
pub fn identity_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(api_key) = header_value(headers, API_KEY_HEADER) {
        return format!("key:{api_key}");
    }

    let forwarded = header_value(headers, FORWARDED_FOR_HEADER)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return format!("ip:{ip}");
    }

    match peer {
        Some(addr) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}
