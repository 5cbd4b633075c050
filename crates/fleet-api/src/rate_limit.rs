use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limiter keyed by endpoint class and user.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    windows: Arc<Mutex<HashMap<(ProtectedEndpoint, String), RateWindow>>>,
    window: Duration,
    read_limit: u32,
    write_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectedEndpoint {
    FleetRead,
    FleetWrite,
}

#[derive(Default)]
struct Counters {
    allowed: AtomicU64,
    limited: AtomicU64,
}

#[derive(Default)]
struct RateLimitMetrics {
    read: Counters,
    write: Counters,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub read_allowed: u64,
    pub read_limited: u64,
    pub write_allowed: u64,
    pub write_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.fleet_read_rate_limit_per_window,
            config.fleet_write_rate_limit_per_window,
        )
    }

    pub fn new(window: Duration, read_limit: u32, write_limit: u32) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            window,
            read_limit,
            write_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::FleetRead => self.read_limit,
            ProtectedEndpoint::FleetWrite => self.write_limit,
        };

        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry((endpoint, user_id.to_string()))
            .or_insert(RateWindow {
                started_at: now,
                count: 0,
            });

        let mut elapsed = now.duration_since(window.started_at);
        if elapsed >= self.window {
            *window = RateWindow {
                started_at: now,
                count: 0,
            };
            elapsed = Duration::ZERO;
        }

        let counters = self.counters(endpoint);
        if window.count >= limit {
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs();
            counters.limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Rate limit exceeded for fleet endpoint",
                retry_after_secs,
            ));
        }

        window.count += 1;
        counters.allowed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RateLimitMetricsSnapshot {
            read_allowed: load(&self.metrics.read.allowed),
            read_limited: load(&self.metrics.read.limited),
            write_allowed: load(&self.metrics.write.allowed),
            write_limited: load(&self.metrics.write.limited),
        }
    }

    fn counters(&self, endpoint: ProtectedEndpoint) -> &Counters {
        match endpoint {
            ProtectedEndpoint::FleetRead => &self.metrics.read,
            ProtectedEndpoint::FleetWrite => &self.metrics.write,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::FleetRead => "fleet_read",
            Self::FleetWrite => "fleet_write",
        }
    }
}

/// Stable, non-reversible tag for logging a user id.
pub fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_blocks_after_limit() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 2, 2);

        limiter
            .check(ProtectedEndpoint::FleetRead, "user-a")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::FleetRead, "user-a")
            .await
            .unwrap();

        let err = limiter
            .check(ProtectedEndpoint::FleetRead, "user-a")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(_, _)));

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.read_allowed, 2);
        assert_eq!(metrics.read_limited, 1);
    }

    #[tokio::test]
    async fn limits_are_per_user_and_endpoint() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 1, 1);

        limiter
            .check(ProtectedEndpoint::FleetRead, "user-a")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::FleetWrite, "user-a")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::FleetRead, "user-b")
            .await
            .unwrap();

        assert_eq!(limiter.metrics_snapshot().write_allowed, 1);
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(user_fingerprint("driver"), user_fingerprint("driver"));
        assert_ne!(user_fingerprint("driver"), user_fingerprint("office"));
    }
}
