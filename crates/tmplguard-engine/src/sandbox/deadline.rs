use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a render and its watchdog.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Wall-clock budget of one evaluation.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: CancelToken,
}

impl Deadline {
    pub fn new(budget: Duration, cancel: CancelToken) -> Self {
        let now = Instant::now();
        Self {
            at: now.checked_add(budget).unwrap_or(now),
            cancel,
        }
    }

    pub fn expired(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.at
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let d = Deadline::new(Duration::from_secs(60), token.clone());
        assert!(!d.expired());
        token.cancel();
        assert!(d.expired());
    }

    #[test]
    fn zero_budget_expires_immediately() {
        assert!(Deadline::new(Duration::ZERO, CancelToken::new()).expired());
    }
}
