//! Tiered in-memory caching with stale-serving reads and validated writes.
//!
//! Three independently expiring tiers hold the bulk world snapshot, per
//! nation snapshots, and alliance snapshots. Reads never block on network
//! I/O: a stale payload is served immediately together with a flag telling
//! the caller to kick off a refresh. Writes fetch through a
//! [`SnapshotSource`], validate structurally, and replace the entry
//! wholesale; an invalid or partial response leaves the previous entry
//! untouched. Concurrent refreshes of the same tier and key collapse into a
//! single in-flight fetch.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::warn;

use crate::clock::Clock;
use crate::config::TierTtls;
use crate::domain::{Alliance, AllianceId, BulkDataset, Nation, NationId, ValidationError};
use crate::error::FetchError;

/// The three cache stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierId {
    Bulk,
    Nation,
    Alliance,
}

impl Display for TierId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Bulk => "bulk",
            Self::Nation => "nation",
            Self::Alliance => "alliance",
        })
    }
}

/// Failure modes of a snapshot fetch.
///
/// `Invalid` covers bodies that cannot be decoded into the expected shape;
/// it is absorbed by the cache exactly like a structural validation failure
/// and never reaches readers.
#[derive(Debug, Clone)]
pub enum SnapshotError {
    Fetch(FetchError),
    Invalid(String),
}

impl From<FetchError> for SnapshotError {
    fn from(error: FetchError) -> Self {
        Self::Fetch(error)
    }
}

pub type SnapshotFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, SnapshotError>> + Send + 'a>>;

/// Upstream fetch contract the cache refreshes through. Implemented over
/// the dispatcher in production and stubbed out in tests.
pub trait SnapshotSource: Send + Sync {
    fn bulk<'a>(&'a self) -> SnapshotFuture<'a, BulkDataset>;
    fn nation<'a>(&'a self, id: NationId) -> SnapshotFuture<'a, Nation>;
    fn alliance<'a>(&'a self, id: AllianceId) -> SnapshotFuture<'a, Alliance>;
}

/// Non-blocking read result. `stale` is informational, not blocking: the
/// payload (when present) is served regardless, and the flag tells the
/// caller a background refresh is due. An absent entry reads as stale.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    pub payload: Option<Arc<T>>,
    pub stale: bool,
}

impl<T> CacheRead<T> {
    fn absent() -> Self {
        Self {
            payload: None,
            stale: true,
        }
    }
}

#[derive(Debug)]
struct TierEntry<T> {
    payload: Arc<T>,
    fetched_at: Instant,
    fetched_wall: OffsetDateTime,
}

impl<T> TierEntry<T> {
    fn new(payload: T, now: Instant) -> Self {
        Self {
            payload: Arc::new(payload),
            fetched_at: now,
            fetched_wall: OffsetDateTime::now_utc(),
        }
    }
}

/// Per-tier diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entries: usize,
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub bulk: TierStats,
    pub nations: TierStats,
    pub alliances: TierStats,
}

type RefreshKey = (TierId, Option<u32>);
type RefreshOutcome = Option<Result<(), FetchError>>;

/// The three tier stores plus the in-flight refresh registry.
pub struct TieredCache {
    source: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,
    ttls: TierTtls,
    bulk: RwLock<Option<TierEntry<BulkDataset>>>,
    nations: RwLock<HashMap<NationId, TierEntry<Nation>>>,
    alliances: RwLock<HashMap<AllianceId, TierEntry<Alliance>>>,
    in_flight: Mutex<HashMap<RefreshKey, watch::Receiver<RefreshOutcome>>>,
}

impl TieredCache {
    pub fn new(source: Arc<dyn SnapshotSource>, clock: Arc<dyn Clock>, ttls: TierTtls) -> Self {
        Self {
            source,
            clock,
            ttls,
            bulk: RwLock::new(None),
            nations: RwLock::new(HashMap::new()),
            alliances: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_bulk(&self) -> CacheRead<BulkDataset> {
        let guard = self.bulk.read().expect("bulk tier lock is not poisoned");
        match guard.as_ref() {
            Some(entry) => CacheRead {
                payload: Some(entry.payload.clone()),
                stale: self.is_stale(entry.fetched_at, self.ttls.bulk),
            },
            None => CacheRead::absent(),
        }
    }

    pub fn get_nation(&self, id: NationId) -> CacheRead<Nation> {
        let guard = self.nations.read().expect("nation tier lock is not poisoned");
        match guard.get(&id) {
            Some(entry) => CacheRead {
                payload: Some(entry.payload.clone()),
                stale: self.is_stale(entry.fetched_at, self.ttls.nation),
            },
            None => CacheRead::absent(),
        }
    }

    pub fn get_alliance(&self, id: AllianceId) -> CacheRead<Alliance> {
        let guard = self
            .alliances
            .read()
            .expect("alliance tier lock is not poisoned");
        match guard.get(&id) {
            Some(entry) => CacheRead {
                payload: Some(entry.payload.clone()),
                stale: self.is_stale(entry.fetched_at, self.ttls.alliance),
            },
            None => CacheRead::absent(),
        }
    }

    /// Fetch, validate, and commit one tier entry (or sweep every cached
    /// key of a tier when `key` is `None`). Always fetches regardless of
    /// TTL; staleness gating is the caller's concern. Transport-level
    /// failures surface; validation failures are absorbed and the previous
    /// entry retained.
    pub async fn refresh(&self, tier: TierId, key: Option<u32>) -> Result<(), FetchError> {
        match (tier, key) {
            (TierId::Bulk, _) => self.refresh_bulk().await,
            (TierId::Nation, Some(id)) => self.refresh_nation(id).await,
            (TierId::Nation, None) => self.sweep_nations().await,
            (TierId::Alliance, Some(id)) => self.refresh_alliance(id).await,
            (TierId::Alliance, None) => self.sweep_alliances().await,
        }
    }

    /// Drop entries. The only way cache state is cleared besides wholesale
    /// replacement.
    pub fn invalidate(&self, tier: TierId, key: Option<u32>) {
        match (tier, key) {
            (TierId::Bulk, _) => {
                *self.bulk.write().expect("bulk tier lock is not poisoned") = None;
            }
            (TierId::Nation, Some(id)) => {
                self.nations
                    .write()
                    .expect("nation tier lock is not poisoned")
                    .remove(&id);
            }
            (TierId::Nation, None) => {
                self.nations
                    .write()
                    .expect("nation tier lock is not poisoned")
                    .clear();
            }
            (TierId::Alliance, Some(id)) => {
                self.alliances
                    .write()
                    .expect("alliance tier lock is not poisoned")
                    .remove(&id);
            }
            (TierId::Alliance, None) => {
                self.alliances
                    .write()
                    .expect("alliance tier lock is not poisoned")
                    .clear();
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let bulk = {
            let guard = self.bulk.read().expect("bulk tier lock is not poisoned");
            TierStats {
                entries: usize::from(guard.is_some()),
                last_update: guard.as_ref().and_then(|entry| format_wall(entry.fetched_wall)),
            }
        };
        let nations = {
            let guard = self.nations.read().expect("nation tier lock is not poisoned");
            TierStats {
                entries: guard.len(),
                last_update: latest_wall(guard.values().map(|entry| entry.fetched_wall)),
            }
        };
        let alliances = {
            let guard = self
                .alliances
                .read()
                .expect("alliance tier lock is not poisoned");
            TierStats {
                entries: guard.len(),
                last_update: latest_wall(guard.values().map(|entry| entry.fetched_wall)),
            }
        };
        CacheStats {
            bulk,
            nations,
            alliances,
        }
    }

    fn is_stale(&self, fetched_at: Instant, ttl: Duration) -> bool {
        self.clock.now().duration_since(fetched_at) >= ttl
    }

    async fn refresh_bulk(&self) -> Result<(), FetchError> {
        self.single_flight((TierId::Bulk, None), async {
            let Some(dataset) =
                vet(TierId::Bulk, None, self.source.bulk().await, BulkDataset::validate)?
            else {
                return Ok(());
            };
            let entry = TierEntry::new(dataset, self.clock.now());
            *self.bulk.write().expect("bulk tier lock is not poisoned") = Some(entry);
            Ok(())
        })
        .await
    }

    async fn refresh_nation(&self, id: NationId) -> Result<(), FetchError> {
        self.single_flight((TierId::Nation, Some(id)), async {
            let Some(nation) = vet(
                TierId::Nation,
                Some(id),
                self.source.nation(id).await,
                Nation::validate,
            )?
            else {
                return Ok(());
            };
            let entry = TierEntry::new(nation, self.clock.now());
            self.nations
                .write()
                .expect("nation tier lock is not poisoned")
                .insert(id, entry);
            Ok(())
        })
        .await
    }

    async fn refresh_alliance(&self, id: AllianceId) -> Result<(), FetchError> {
        self.single_flight((TierId::Alliance, Some(id)), async {
            let Some(alliance) = vet(
                TierId::Alliance,
                Some(id),
                self.source.alliance(id).await,
                Alliance::validate,
            )?
            else {
                return Ok(());
            };
            let entry = TierEntry::new(alliance, self.clock.now());
            self.alliances
                .write()
                .expect("alliance tier lock is not poisoned")
                .insert(id, entry);
            Ok(())
        })
        .await
    }

    async fn sweep_nations(&self) -> Result<(), FetchError> {
        let ids: Vec<NationId> = {
            let guard = self.nations.read().expect("nation tier lock is not poisoned");
            guard.keys().copied().collect()
        };
        let mut first_error = None;
        for id in ids {
            if let Err(error) = self.refresh_nation(id).await {
                warn!(tier = %TierId::Nation, id, error = %error, "sweep refresh failed");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn sweep_alliances(&self) -> Result<(), FetchError> {
        let ids: Vec<AllianceId> = {
            let guard = self
                .alliances
                .read()
                .expect("alliance tier lock is not poisoned");
            guard.keys().copied().collect()
        };
        let mut first_error = None;
        for id in ids {
            if let Err(error) = self.refresh_alliance(id).await {
                warn!(tier = %TierId::Alliance, id, error = %error, "sweep refresh failed");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Collapse concurrent refreshes of the same tier+key. The first caller
    /// performs the fetch; later callers await its published outcome rather
    /// than issuing their own upstream call.
    async fn single_flight<F>(&self, key: RefreshKey, fetch: F) -> Result<(), FetchError>
    where
        F: Future<Output = Result<(), FetchError>>,
    {
        enum Role {
            Leader(watch::Sender<RefreshOutcome>),
            Follower(watch::Receiver<RefreshOutcome>),
        }

        let role = {
            let mut in_flight = self
                .in_flight
                .lock()
                .expect("in-flight map lock is not poisoned");
            if let Some(receiver) = in_flight.get(&key) {
                Role::Follower(receiver.clone())
            } else {
                let (sender, receiver) = watch::channel(None);
                in_flight.insert(key, receiver);
                Role::Leader(sender)
            }
        };

        match role {
            Role::Leader(sender) => {
                // The guard unregisters the key even if this future is
                // dropped mid-fetch, so an abandoned refresh cannot wedge
                // later callers behind a dead channel.
                let guard = InFlightGuard {
                    in_flight: &self.in_flight,
                    key,
                    armed: true,
                };
                let result = fetch.await;
                guard.finish();
                let _ = sender.send(Some(result.clone()));
                result
            }
            Role::Follower(mut receiver) => loop {
                let published = receiver.borrow_and_update().clone();
                if let Some(result) = published {
                    return result;
                }
                if receiver.changed().await.is_err() {
                    return Err(FetchError::TransportFailure {
                        reason: String::from("refresh abandoned by initiator"),
                    });
                }
            },
        }
    }
}

struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<RefreshKey, watch::Receiver<RefreshOutcome>>>,
    key: RefreshKey,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn finish(mut self) {
        self.remove_entry();
        self.armed = false;
    }

    fn remove_entry(&self) {
        self.in_flight
            .lock()
            .expect("in-flight map lock is not poisoned")
            .remove(&self.key);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.remove_entry();
        }
    }
}

/// Classify one fetch outcome: a committable payload, an absorbed invalid
/// snapshot (`None`), or a surfaced fetch error.
fn vet<T>(
    tier: TierId,
    key: Option<u32>,
    outcome: Result<T, SnapshotError>,
    validate: impl FnOnce(&T) -> Result<(), ValidationError>,
) -> Result<Option<T>, FetchError> {
    match outcome {
        Ok(payload) => match validate(&payload) {
            Ok(()) => Ok(Some(payload)),
            Err(error) => {
                warn!(%tier, key, error = %error, "discarding structurally invalid snapshot");
                Ok(None)
            }
        },
        Err(SnapshotError::Invalid(reason)) => {
            warn!(%tier, key, reason, "discarding undecodable snapshot");
            Ok(None)
        }
        Err(SnapshotError::Fetch(error)) => Err(error),
    }
}

fn format_wall(wall: OffsetDateTime) -> Option<String> {
    wall.format(&Rfc3339).ok()
}

fn latest_wall(walls: impl Iterator<Item = OffsetDateTime>) -> Option<String> {
    walls.max().and_then(format_wall)
}
