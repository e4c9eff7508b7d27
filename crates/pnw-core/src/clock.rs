//! Time seams for the pool, limiter, and cache.
//!
//! Quota windows, health recovery, TTL staleness, and retry backoff all
//! depend on the passage of time. Production code uses the monotonic system
//! clock and tokio's timer; tests swap in [`ManualClock`] and
//! [`RecordingSleeper`] so every timing property is checked without real
//! time passing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic clock abstraction.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock backed by [`Instant::now`].
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for offline tests. Starts at an arbitrary epoch and
/// only moves when [`advance`](ManualClock::advance) is called.
#[derive(Debug)]
pub struct ManualClock {
    epoch: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().expect("manual clock lock is not poisoned");
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().expect("manual clock lock is not poisoned");
        self.epoch + *offset
    }
}

/// Suspension mechanism used for retry backoff delays.
pub trait Sleeper: Send + Sync {
    fn sleep<'a>(&'a self, duration: Duration)
        -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Production sleeper backed by tokio's timer.
#[derive(Debug, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep<'a>(
        &'a self,
        duration: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Sleeper that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn slept(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .expect("recording sleeper lock is not poisoned")
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep<'a>(
        &'a self,
        duration: Duration,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        self.slept
            .lock()
            .expect("recording sleeper lock is not poisoned")
            .push(duration);
        Box::pin(std::future::ready(()))
    }
}
