//! Rolling-window quota accounting, one counter per credential.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::credentials::CredentialId;

#[derive(Debug)]
struct UsageCounter {
    calls: u32,
    window_reset_at: Instant,
}

/// Enforces the upstream per-key quota (1000 calls per rolling hour).
///
/// Reservation is optimistic: quota is consumed before the network call is
/// attempted, so an aborted call still counts. Counters are created lazily
/// and guarded individually; the outer map lock is only taken for writing
/// on first use of a credential.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    window: Duration,
    limit: u32,
    counters: RwLock<HashMap<CredentialId, Mutex<UsageCounter>>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, window: Duration, limit: u32) -> Self {
        Self {
            clock,
            window,
            limit,
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Reset the window if it has elapsed, then reserve one call if there is
    /// headroom. Returns false without mutating the count when the
    /// credential is at quota; the caller must try another credential.
    pub fn check_and_reserve(&self, id: CredentialId) -> bool {
        let now = self.clock.now();
        self.with_counter(id, |counter| {
            if now >= counter.window_reset_at {
                counter.calls = 0;
                counter.window_reset_at = now + self.window;
            }
            if counter.calls < self.limit {
                counter.calls += 1;
                true
            } else {
                false
            }
        })
    }

    /// Effective call count right now, with the lazy window reset applied to
    /// the answer but not to stored state. Never-seen credentials read 0.
    pub fn current_usage(&self, id: CredentialId) -> u32 {
        let now = self.clock.now();
        let counters = self.counters.read().expect("usage map lock is not poisoned");
        match counters.get(&id) {
            Some(cell) => {
                let counter = cell.lock().expect("usage counter lock is not poisoned");
                if now >= counter.window_reset_at {
                    0
                } else {
                    counter.calls
                }
            }
            None => 0,
        }
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Zero every counter and restart its window.
    pub fn reset(&self) {
        let now = self.clock.now();
        let counters = self.counters.read().expect("usage map lock is not poisoned");
        for cell in counters.values() {
            let mut counter = cell.lock().expect("usage counter lock is not poisoned");
            counter.calls = 0;
            counter.window_reset_at = now + self.window;
        }
    }

    fn with_counter<R>(&self, id: CredentialId, f: impl FnOnce(&mut UsageCounter) -> R) -> R {
        {
            let counters = self.counters.read().expect("usage map lock is not poisoned");
            if let Some(cell) = counters.get(&id) {
                let mut counter = cell.lock().expect("usage counter lock is not poisoned");
                return f(&mut counter);
            }
        }

        let mut counters = self.counters.write().expect("usage map lock is not poisoned");
        let cell = counters.entry(id).or_insert_with(|| {
            Mutex::new(UsageCounter {
                calls: 0,
                window_reset_at: self.clock.now() + self.window,
            })
        });
        let mut counter = cell.lock().expect("usage counter lock is not poisoned");
        f(&mut counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const WINDOW: Duration = Duration::from_secs(3600);

    fn limiter(limit: u32) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(clock.clone(), WINDOW, limit);
        (clock, limiter)
    }

    #[test]
    fn reservations_count_up_to_the_limit() {
        let (_, limiter) = limiter(3);
        let id = CredentialId(0);

        assert!(limiter.check_and_reserve(id));
        assert!(limiter.check_and_reserve(id));
        assert!(limiter.check_and_reserve(id));
        assert_eq!(limiter.current_usage(id), 3);

        // At quota; the count must not move.
        assert!(!limiter.check_and_reserve(id));
        assert_eq!(limiter.current_usage(id), 3);
    }

    #[test]
    fn window_resets_exactly_at_the_boundary() {
        let (clock, limiter) = limiter(2);
        let id = CredentialId(0);

        assert!(limiter.check_and_reserve(id));
        assert!(limiter.check_and_reserve(id));
        assert!(!limiter.check_and_reserve(id));

        clock.advance(WINDOW - Duration::from_secs(1));
        assert_eq!(limiter.current_usage(id), 2);
        assert!(!limiter.check_and_reserve(id));

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.current_usage(id), 0);
        assert!(limiter.check_and_reserve(id));
        assert_eq!(limiter.current_usage(id), 1);
    }

    #[test]
    fn counters_are_independent_per_credential() {
        let (_, limiter) = limiter(1);

        assert!(limiter.check_and_reserve(CredentialId(0)));
        assert!(!limiter.check_and_reserve(CredentialId(0)));
        assert!(limiter.check_and_reserve(CredentialId(1)));
    }

    #[test]
    fn reset_zeroes_counters_and_restarts_windows() {
        let (_, limiter) = limiter(1);
        let id = CredentialId(0);

        assert!(limiter.check_and_reserve(id));
        limiter.reset();
        assert_eq!(limiter.current_usage(id), 0);
        assert!(limiter.check_and_reserve(id));
    }
}
