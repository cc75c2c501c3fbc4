//! Sliding-window rate limiting for the request boundary.
//!
//! A [`RateLimiter`] is an ordinary value owned by whoever handles requests
//! (see [`crate::request::StoryService`]). Each key (client id, user id, IP)
//! keeps the instants of its accepted requests inside the current window;
//! a request is allowed while fewer than `max_requests` remain in it.
//!
//! Idle keys are swept every [`SWEEP_EVERY`] checks, so the map stays
//! bounded by the clients active within one window.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Checks between two sweeps of idle keys.
pub const SWEEP_EVERY: u64 = 64;

/// Requests allowed per key within a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    /// 10 stories per 15 minutes.
    pub fn story_generation() -> Self {
        Self::new(10, 15 * 60)
    }

    /// 20 images per 15 minutes.
    pub fn image_generation() -> Self {
        Self::new(20, 15 * 60)
    }

    /// 100 requests per minute.
    pub fn general() -> Self {
        Self::new(100, 60)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Outcome of one [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests still available in the current window after this one.
    pub remaining: u32,
    /// Time until the oldest request leaves the window. Zero when allowed.
    pub retry_after: Duration,
}

/// Keyed sliding-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Record a request for `key` now, if allowed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let window = self.config.window();
        let max = self.config.max_requests as usize;
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            retain_active(&mut windows, now, window);
        }
        let hits = windows.entry(key.to_string()).or_default();

        while hits
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            hits.pop_front();
        }

        if hits.len() >= max {
            let retry_after = hits
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            if hits.is_empty() {
                windows.remove(key);
            }
            debug!("Rate limit hit for {} (retry in {:?})", key, retry_after);
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        hits.push_back(now);
        RateLimitDecision {
            allowed: true,
            remaining: (max - hits.len()) as u32,
            retry_after: Duration::ZERO,
        }
    }

    /// Drop keys with no requests left in their window.
    pub fn prune(&self, now: Instant) {
        let window = self.config.window();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        retain_active(&mut windows, now, window);
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn retain_active(windows: &mut HashMap<String, VecDeque<Instant>>, now: Instant, window: Duration) {
    let before = windows.len();
    windows.retain(|_, hits| {
        hits.back()
            .is_some_and(|t| now.saturating_duration_since(*t) < window)
    });
    if windows.len() < before {
        debug!("Rate limiter forgot {} idle keys", before - windows.len());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::story_generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_blocks() {
        let limiter = RateLimiter::new(RateLimitConfig::new(3, 60));
        let t0 = Instant::now();
        assert_eq!(limiter.check_at("a", t0).remaining, 2);
        assert_eq!(limiter.check_at("a", t0).remaining, 1);
        assert_eq!(limiter.check_at("a", t0).remaining, 0);

        let blocked = limiter.check_at("a", t0 + Duration::from_secs(10));
        assert!(!blocked.allowed);
        assert_eq!(blocked.retry_after, Duration::from_secs(50));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 60));
        let t0 = Instant::now();
        assert!(limiter.check_at("a", t0).allowed);
        assert!(limiter.check_at("b", t0).allowed);
        assert!(!limiter.check_at("a", t0).allowed);
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2, 60));
        let t0 = Instant::now();
        assert!(limiter.check_at("a", t0).allowed);
        assert!(limiter.check_at("a", t0 + Duration::from_secs(30)).allowed);
        assert!(!limiter.check_at("a", t0 + Duration::from_secs(59)).allowed);
        // The first request has left the window; the second has not.
        let d = limiter.check_at("a", t0 + Duration::from_secs(60));
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);
    }

    #[test]
    fn blocked_requests_are_not_recorded() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 60));
        let t0 = Instant::now();
        limiter.check_at("a", t0);
        for s in 1..30 {
            assert!(!limiter.check_at("a", t0 + Duration::from_secs(s)).allowed);
        }
        assert!(limiter.check_at("a", t0 + Duration::from_secs(60)).allowed);
    }

    #[test]
    fn prune_forgets_idle_keys() {
        let limiter = RateLimiter::new(RateLimitConfig::new(5, 60));
        let t0 = Instant::now();
        limiter.check_at("a", t0);
        limiter.check_at("b", t0 + Duration::from_secs(40));
        limiter.prune(t0 + Duration::from_secs(70));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn idle_keys_are_swept_by_ordinary_checks() {
        let limiter = RateLimiter::new(RateLimitConfig::new(5, 60));
        let t0 = Instant::now();
        for i in 0..10 {
            limiter.check_at(&format!("client-{i}"), t0);
        }
        assert_eq!(limiter.tracked_keys(), 10);

        let later = t0 + Duration::from_secs(61);
        for _ in 0..SWEEP_EVERY {
            limiter.check_at("active", later);
        }
        assert_eq!(limiter.tracked_keys(), 1);
        assert!(!limiter.check_at("active", later).allowed);
    }

    #[test]
    fn recent_keys_survive_a_sweep() {
        let limiter = RateLimiter::new(RateLimitConfig::new(100, 60));
        let t0 = Instant::now();
        limiter.check_at("recent", t0);
        for _ in 1..SWEEP_EVERY {
            limiter.check_at("other", t0 + Duration::from_secs(30));
        }
        assert_eq!(limiter.tracked_keys(), 2);
        assert!(limiter.check_at("recent", t0 + Duration::from_secs(30)).remaining < 99);
    }

    #[test]
    fn zero_budget_keys_are_not_retained() {
        let limiter = RateLimiter::new(RateLimitConfig::new(0, 60));
        assert!(!limiter.check("a").allowed);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn story_preset() {
        let c = RateLimitConfig::story_generation();
        assert_eq!(c.max_requests, 10);
        assert_eq!(c.window(), Duration::from_secs(900));
    }
}
