//! Background refresh timers, one per cache tier.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{TierId, TieredCache};
use crate::config::TierTtls;

/// Drives each tier's refresh at its TTL cadence, independent of read
/// traffic. The first tick fires immediately so the cache is warmed at
/// startup. Failures are logged and the loop keeps running; on-demand
/// refreshes are never serialized behind these tasks (the cache's
/// single-flight map is the only coordination point).
pub struct RefreshScheduler {
    handles: Vec<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn spawn(cache: Arc<TieredCache>, ttls: TierTtls) -> Self {
        let handles = vec![
            tokio::spawn(refresh_loop(cache.clone(), TierId::Bulk, ttls.bulk)),
            tokio::spawn(refresh_loop(cache.clone(), TierId::Nation, ttls.nation)),
            tokio::spawn(refresh_loop(cache, TierId::Alliance, ttls.alliance)),
        ];
        Self { handles }
    }

    /// Stop the timers. In-flight refreshes are dropped; the cache's guard
    /// cleans up their in-flight registrations.
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

async fn refresh_loop(cache: Arc<TieredCache>, tier: TierId, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        debug!(%tier, "scheduled refresh");
        if let Err(error) = cache.refresh(tier, None).await {
            warn!(%tier, error = %error, "scheduled refresh failed");
        }
    }
}
