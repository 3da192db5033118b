//! Sliding-window rate limiter keyed by `(user, action)`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tmplguard_core::error::{GuardError, Result};

use crate::config::WindowLimit;

type Window = Arc<Mutex<VecDeque<Instant>>>;

/// Shared across threads behind an `Arc`. Each key has its own mutex, so
/// unrelated users never contend.
pub struct RateLimiter {
    policy: HashMap<String, Vec<WindowLimit>>,
    windows: DashMap<(String, String), Window>,
}

impl RateLimiter {
    pub fn new(policy: HashMap<String, Vec<WindowLimit>>) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
        }
    }

    pub fn check_and_record(&self, user: &str, action: &str) -> Result<()> {
        self.check_and_record_at(user, action, Instant::now())
    }

    /// Same as [`check_and_record`](Self::check_and_record) with an explicit clock.
    pub fn check_and_record_at(&self, user: &str, action: &str, now: Instant) -> Result<()> {
        let Some(limits) = self.policy.get(action) else {
            return Ok(());
        };
        let Some(horizon) = limits.iter().map(WindowLimit::window).max() else {
            return Ok(());
        };

        // Clone the Arc so the shard lock is released before the key lock is taken.
        let window = self
            .windows
            .entry((user.to_string(), action.to_string()))
            .or_default()
            .clone();

        // Poisoned mutex means a logic bug; deny rather than panic.
        let Ok(mut stamps) = window.lock() else {
            return Err(denied(action));
        };

        prune(&mut stamps, now, horizon);
        for limit in limits {
            if in_window(&stamps, now, limit.window()) >= limit.limit as usize {
                tracing::debug!(user = %user, action = %action, window_secs = limit.window_secs, "rate limit hit");
                return Err(denied(action));
            }
        }
        stamps.push_back(now);
        Ok(())
    }

    /// Events currently counted for `(user, action)`.
    pub fn usage(&self, user: &str, action: &str) -> usize {
        let Some(window) = self
            .windows
            .get(&(user.to_string(), action.to_string()))
            .map(|w| w.value().clone())
        else {
            return 0;
        };
        let stamps = window.lock();
        stamps.map(|g| g.len()).unwrap_or(0)
    }

    /// Forget all recorded events for `(user, action)`.
    pub fn reset(&self, user: &str, action: &str) {
        self.windows.remove(&(user.to_string(), action.to_string()));
    }
}

fn denied(action: &str) -> GuardError {
    GuardError::RateLimitExceeded {
        action: action.to_string(),
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant, horizon: Duration) {
    while let Some(front) = stamps.front() {
        if now.saturating_duration_since(*front) >= horizon {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

fn in_window(stamps: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    stamps
        .iter()
        .rev()
        .take_while(|t| now.saturating_duration_since(**t) < window)
        .count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn limiter(windows: Vec<WindowLimit>) -> RateLimiter {
        RateLimiter::new(HashMap::from([("render".to_string(), windows)]))
    }

    #[test]
    fn sixth_call_in_window_is_denied_until_window_passes() {
        let rl = limiter(vec![WindowLimit::new(60, 5)]);
        let t0 = Instant::now();
        for i in 0..5 {
            assert!(rl.check_and_record_at("u", "render", t0 + Duration::from_secs(i)).is_ok());
        }
        assert_eq!(
            rl.check_and_record_at("u", "render", t0 + Duration::from_secs(10)),
            Err(GuardError::RateLimitExceeded { action: "render".into() })
        );
        // Denials are not recorded.
        assert_eq!(rl.usage("u", "render"), 5);

        assert!(rl.check_and_record_at("u", "render", t0 + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn all_windows_must_pass() {
        let rl = limiter(vec![WindowLimit::new(1, 10), WindowLimit::new(60, 3)]);
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(rl.check_and_record_at("u", "render", t0 + Duration::from_secs(2 * i)).is_ok());
        }
        assert!(rl.check_and_record_at("u", "render", t0 + Duration::from_secs(10)).is_err());
    }

    #[test]
    fn users_and_unknown_actions_are_independent() {
        let rl = limiter(vec![WindowLimit::new(60, 1)]);
        let t0 = Instant::now();
        assert!(rl.check_and_record_at("a", "render", t0).is_ok());
        assert!(rl.check_and_record_at("b", "render", t0).is_ok());
        assert!(rl.check_and_record_at("a", "render", t0).is_err());
        for _ in 0..100 {
            assert!(rl.check_and_record_at("a", "export", t0).is_ok());
        }
        rl.reset("a", "render");
        assert!(rl.check_and_record_at("a", "render", t0).is_ok());
    }
}
