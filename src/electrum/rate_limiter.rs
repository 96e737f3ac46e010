//! Per-server rate limiting with token-bucket caps and exponential backoff
//! (spec §4.10).
//!
//! The limiter never surfaces [`RateLimitError::Throttled`] to a caller
//! (per spec §7's propagation policy: "the rate limiter never surfaces
//! `Throttled`; it delays and retries internally") — [`RateLimiter::wait`]
//! sleeps out the delay itself. The error variant exists for callers that
//! want to observe throttling without blocking, via [`RateLimiter::check`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Surfaced only by [`RateLimiter::check`]; [`RateLimiter::wait`] absorbs
/// this internally.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitError {
    #[error("throttled for {delay_ms}ms: {reason}")]
    Throttled { delay_ms: u64, reason: String },
}

/// Per-server limits (spec §4.10/§6).
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_per_second: u32,
    pub max_per_minute: u32,
    pub max_concurrent: u32,
    pub base_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_second: 10,
            max_per_minute: 200,
            max_concurrent: 8,
            base_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

struct ServerTracker {
    second_window_start: Instant,
    second_count: u32,
    minute_window_start: Instant,
    minute_count: u32,
    in_flight: u32,
    current_backoff: Duration,
    next_allowed_at: Option<Instant>,
}

impl ServerTracker {
    fn new(config: &RateLimiterConfig) -> Self {
        let now = Instant::now();
        Self {
            second_window_start: now,
            second_count: 0,
            minute_window_start: now,
            minute_count: 0,
            in_flight: 0,
            current_backoff: config.base_backoff,
            next_allowed_at: None,
        }
    }

    fn roll_windows(&mut self, now: Instant) {
        if now.duration_since(self.second_window_start) >= Duration::from_secs(1) {
            self.second_window_start = now;
            self.second_count = 0;
        }
        if now.duration_since(self.minute_window_start) >= Duration::from_secs(60) {
            self.minute_window_start = now;
            self.minute_count = 0;
        }
    }
}

/// Decision returned by [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    pub delay_ms: u64,
    pub reason: Option<String>,
}

/// Tracks per-server request counters, concurrency, and backoff state.
pub struct RateLimiter {
    config: RateLimiterConfig,
    servers: Mutex<HashMap<String, ServerTracker>>,
}

impl RateLimiter {
    /// New limiter with the given per-server defaults.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate, without blocking, whether `server` may issue `method` now.
    /// Checks in order: backoff window, concurrency cap, per-second cap,
    /// per-minute cap.
    pub fn check(&self, server: &str, method: &str) -> Admission {
        let now = Instant::now();
        let mut servers = self.servers.lock().expect("rate limiter poisoned");
        let tracker = servers
            .entry(server.to_string())
            .or_insert_with(|| ServerTracker::new(&self.config));
        tracker.roll_windows(now);

        if let Some(next_allowed) = tracker.next_allowed_at {
            if now < next_allowed {
                let delay_ms = (next_allowed - now).as_millis() as u64;
                return Admission {
                    allowed: false,
                    delay_ms,
                    reason: Some(format!("{server} backing off after recent failures")),
                };
            }
        }
        if tracker.in_flight >= self.config.max_concurrent {
            return Admission {
                allowed: false,
                delay_ms: 25,
                reason: Some(format!("{server} at max concurrency for {method}")),
            };
        }
        if tracker.second_count >= self.config.max_per_second {
            let elapsed = now.duration_since(tracker.second_window_start);
            let delay_ms = Duration::from_secs(1).saturating_sub(elapsed).as_millis() as u64;
            return Admission {
                allowed: false,
                delay_ms,
                reason: Some(format!("{server} exceeded per-second cap")),
            };
        }
        if tracker.minute_count >= self.config.max_per_minute {
            let elapsed = now.duration_since(tracker.minute_window_start);
            let delay_ms = Duration::from_secs(60).saturating_sub(elapsed).as_millis() as u64;
            return Admission {
                allowed: false,
                delay_ms,
                reason: Some(format!("{server} exceeded per-minute cap")),
            };
        }

        tracker.second_count += 1;
        tracker.minute_count += 1;
        tracker.in_flight += 1;
        Admission {
            allowed: true,
            delay_ms: 0,
            reason: None,
        }
    }

    /// Block until `server` is allowed to issue `method`, sleeping through
    /// any throttling internally. Never returns `Throttled`.
    pub async fn wait(&self, server: &str, method: &str) {
        loop {
            let admission = self.check(server, method);
            if admission.allowed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(admission.delay_ms.max(1))).await;
        }
    }

    /// Record the outcome of a request admitted by `check`/`wait`: success
    /// resets backoff to the base delay; failure multiplies the current
    /// backoff up to `max_backoff` and sets `next_allowed_at`.
    pub fn record_outcome(&self, server: &str, success: bool) {
        let now = Instant::now();
        let mut servers = self.servers.lock().expect("rate limiter poisoned");
        let tracker = servers
            .entry(server.to_string())
            .or_insert_with(|| ServerTracker::new(&self.config));
        tracker.in_flight = tracker.in_flight.saturating_sub(1);
        if success {
            tracker.current_backoff = self.config.base_backoff;
            tracker.next_allowed_at = None;
        } else {
            tracker.current_backoff = tracker
                .current_backoff
                .mul_f64(self.config.backoff_multiplier)
                .min(self.config.max_backoff);
            tracker.next_allowed_at = Some(now + tracker.current_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_second_cap_throttles() {
        let config = RateLimiterConfig {
            max_per_second: 2,
            ..RateLimiterConfig::default()
        };
        let limiter = RateLimiter::new(config);
        assert!(limiter.check("s1", "m").allowed);
        limiter.record_outcome("s1", true);
        assert!(limiter.check("s1", "m").allowed);
        limiter.record_outcome("s1", true);
        let blocked = limiter.check("s1", "m");
        assert!(!blocked.allowed);
        assert!(blocked.reason.unwrap().contains("per-second"));
    }

    #[test]
    fn failure_sets_backoff_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        assert!(limiter.check("s1", "m").allowed);
        limiter.record_outcome("s1", false);
        let blocked = limiter.check("s1", "m");
        assert!(!blocked.allowed);
        assert!(blocked.reason.unwrap().contains("backing off"));
    }

    #[test]
    fn concurrency_cap_throttles() {
        let config = RateLimiterConfig {
            max_concurrent: 1,
            ..RateLimiterConfig::default()
        };
        let limiter = RateLimiter::new(config);
        assert!(limiter.check("s1", "m").allowed);
        let blocked = limiter.check("s1", "m");
        assert!(!blocked.allowed);
    }
}
