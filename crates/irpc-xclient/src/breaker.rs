//! Circuit breaker interface (§4.7 `getCachedClient` step 2) and a default
//! consecutive-failure implementation. No teacher or pack crate provides a
//! breaker, so this is built directly from the behavior spec.md implies
//! (`Ready()==false` short-circuits without dialing).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait CircuitBreaker: Send + Sync {
    /// `false` means "open" — the caller should fail with `BreakerOpen`
    /// rather than attempt a dial or call.
    fn ready(&self) -> bool;
    fn success(&self);
    fn fail(&self);
}

pub type BreakerFactory = Arc<dyn Fn() -> Arc<dyn CircuitBreaker> + Send + Sync>;

/// Opens after `threshold` consecutive failures, stays open for `cooldown`,
/// then resets to half-open (`ready() == true`, one probe allowed through;
/// failure reopens immediately, success closes fully).
pub struct ConsecutiveFailureBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
    epoch: Instant,
}

impl ConsecutiveFailureBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Arc<dyn CircuitBreaker> {
        Arc::new(Self {
            threshold,
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            epoch: Instant::now(),
        })
    }

    pub fn factory(threshold: u32, cooldown: Duration) -> BreakerFactory {
        Arc::new(move || Self::new(threshold, cooldown))
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl CircuitBreaker for ConsecutiveFailureBreaker {
    fn ready(&self) -> bool {
        let opened_at = self.opened_at_millis.load(Ordering::SeqCst);
        if opened_at == 0 {
            return true;
        }
        self.now_millis().saturating_sub(opened_at) >= self.cooldown.as_millis() as u64
    }

    fn success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.opened_at_millis.store(0, Ordering::SeqCst);
    }

    fn fail(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            self.opened_at_millis.store(self.now_millis().max(1), Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = ConsecutiveFailureBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.ready());
        breaker.fail();
        breaker.fail();
        assert!(breaker.ready());
        breaker.fail();
        assert!(!breaker.ready());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = ConsecutiveFailureBreaker::new(2, Duration::from_secs(60));
        breaker.fail();
        breaker.success();
        breaker.fail();
        assert!(breaker.ready());
    }
}
