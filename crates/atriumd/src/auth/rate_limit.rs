//! Fixed-window request caps keyed by client IP and route.
//!
//! The counter store sits behind a trait so the process-local table can be
//! swapped for a shared limiter without touching request handling.

use std::collections::HashMap;
use std::sync::Mutex;

/// A request cap over a fixed time window.
#[derive(Debug, Clone, Copy)]
pub struct WindowLimit {
    pub max_requests: u32,
    pub window_ms: i64,
}

const TEN_MINUTES_MS: i64 = 10 * 60 * 1000;

/// Cap on gateway registration attempts per client IP.
pub const REGISTER_LIMIT: WindowLimit = WindowLimit {
    max_requests: 40,
    window_ms: TEN_MINUTES_MS,
};

/// Cap on invite-code gateway listing per client IP.
pub const INVITE_LIST_LIMIT: WindowLimit = WindowLimit {
    max_requests: 60,
    window_ms: TEN_MINUTES_MS,
};

/// Counter store behind the per-route request caps.
pub trait RateLimiter: Send + Sync {
    /// Record one request against `key` and report whether the cap is now
    /// exceeded.
    fn consume(&self, key: &str, limit: WindowLimit, now_ms: i64) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: i64,
}

/// Process-local fixed-window limiter. State does not survive restarts.
#[derive(Debug, Default)]
pub struct FixedWindowLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn consume(&self, key: &str, limit: WindowLimit, now_ms: i64) -> bool {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let window = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if w.reset_at <= now_ms {
                    w.count = 1;
                    w.reset_at = now_ms + limit.window_ms;
                } else {
                    w.count += 1;
                }
            })
            .or_insert(Window {
                count: 1,
                reset_at: now_ms + limit.window_ms,
            });

        window.count > limit.max_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: WindowLimit = WindowLimit {
        max_requests: 3,
        window_ms: 1000,
    };

    #[test]
    fn test_under_cap_allowed() {
        let limiter = FixedWindowLimiter::new();
        for _ in 0..3 {
            assert!(!limiter.consume("register:1.2.3.4", LIMIT, 0));
        }
    }

    #[test]
    fn test_over_cap_rejected() {
        let limiter = FixedWindowLimiter::new();
        for _ in 0..3 {
            limiter.consume("register:1.2.3.4", LIMIT, 0);
        }
        assert!(limiter.consume("register:1.2.3.4", LIMIT, 0));
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let limiter = FixedWindowLimiter::new();
        for _ in 0..4 {
            limiter.consume("register:1.2.3.4", LIMIT, 0);
        }
        assert!(limiter.consume("register:1.2.3.4", LIMIT, 999));
        assert!(!limiter.consume("register:1.2.3.4", LIMIT, 1000));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new();
        for _ in 0..4 {
            limiter.consume("register:1.2.3.4", LIMIT, 0);
        }
        assert!(!limiter.consume("register:5.6.7.8", LIMIT, 0));
    }
}
