//! Behavior-driven tests for the tiered cache.
//!
//! These tests verify HOW reads and refreshes interact: stale serving,
//! validation absorption, per-tier TTLs, and the collapse of concurrent
//! refreshes into a single upstream fetch.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pnw_core::{
    Alliance, AllianceId, BulkDataset, ManualClock, Nation, NationId, NationSummary,
    SnapshotError, SnapshotSource, TierId, TierTtls, TieredCache,
};
use tokio::sync::Semaphore;

type SnapshotFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SnapshotError>> + Send + 'a>>;

/// Scripted snapshot source. The bulk path can be gated on a semaphore so a
/// fetch stays in flight until the test releases it, and any path can be
/// switched to producing invalid snapshots.
struct FakeSource {
    bulk_calls: AtomicU32,
    nation_calls: AtomicU32,
    alliance_calls: AtomicU32,
    invalid: AtomicBool,
    gate: Option<Semaphore>,
}

impl FakeSource {
    fn new() -> Self {
        Self {
            bulk_calls: AtomicU32::new(0),
            nation_calls: AtomicU32::new(0),
            alliance_calls: AtomicU32::new(0),
            invalid: AtomicBool::new(false),
            gate: None,
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    fn produce_invalid(&self) {
        self.invalid.store(true, Ordering::SeqCst);
    }

    fn release(&self, permits: usize) {
        self.gate
            .as_ref()
            .expect("gate is configured")
            .add_permits(permits);
    }

    fn dataset(marker: u32) -> BulkDataset {
        BulkDataset {
            nations: vec![NationSummary {
                id: marker,
                nation_name: format!("Nation {marker}"),
                alliance_id: 0,
                score: 100.0,
                num_cities: 1,
                soldiers: 0,
                tanks: 0,
                aircraft: 0,
                ships: 0,
                beige_turns: 0,
                vmode: 0,
            }],
            wars: Vec::new(),
            alliances: Vec::new(),
        }
    }

    fn nation_snapshot(id: NationId, calls: u32) -> Nation {
        Nation {
            id,
            nation_name: format!("Nation {id} v{calls}"),
            leader_name: String::from("Leader"),
            score: 1000.0,
            alliance_id: 0,
            alliance_position: None,
            last_active: None,
            soldiers: 0,
            tanks: 0,
            aircraft: 0,
            ships: 0,
            missiles: 0,
            nukes: 0,
            spies: 0,
            beige_turns: 0,
            vmode: 0,
            cities: Vec::new(),
        }
    }
}

impl SnapshotSource for FakeSource {
    fn bulk<'a>(&'a self) -> SnapshotFuture<'a, BulkDataset> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await.expect("gate is never closed");
                permit.forget();
            }
            let call = self.bulk_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.invalid.load(Ordering::SeqCst) {
                return Err(SnapshotError::Invalid(String::from("truncated body")));
            }
            Ok(Self::dataset(call))
        })
    }

    fn nation<'a>(&'a self, id: NationId) -> SnapshotFuture<'a, Nation> {
        Box::pin(async move {
            let call = self.nation_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.invalid.load(Ordering::SeqCst) {
                return Err(SnapshotError::Invalid(String::from("truncated body")));
            }
            Ok(Self::nation_snapshot(id, call))
        })
    }

    fn alliance<'a>(&'a self, id: AllianceId) -> SnapshotFuture<'a, Alliance> {
        Box::pin(async move {
            self.alliance_calls.fetch_add(1, Ordering::SeqCst);
            if self.invalid.load(Ordering::SeqCst) {
                return Err(SnapshotError::Invalid(String::from("truncated body")));
            }
            Ok(Alliance {
                id,
                name: format!("Alliance {id}"),
                acronym: None,
                score: 50_000.0,
                rank: 10,
                members: 42,
            })
        })
    }
}

fn cache_over(source: Arc<FakeSource>) -> (Arc<ManualClock>, Arc<TieredCache>) {
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(TieredCache::new(source, clock.clone(), TierTtls::default()));
    (clock, cache)
}

// =============================================================================
// Read Path: Stale Serving
// =============================================================================

#[tokio::test]
async fn when_a_tier_was_never_populated_get_reports_absent_and_stale() {
    let source = Arc::new(FakeSource::new());
    let (_, cache) = cache_over(source);

    let read = cache.get_bulk();
    assert!(read.payload.is_none());
    assert!(read.stale);
}

#[tokio::test]
async fn when_the_ttl_elapses_the_payload_is_still_served_but_flagged_stale() {
    // Given: A populated bulk tier (TTL 5 minutes)
    let source = Arc::new(FakeSource::new());
    let (clock, cache) = cache_over(source);
    cache.refresh(TierId::Bulk, None).await.expect("populate");

    // When: Read right after populate
    let fresh = cache.get_bulk();
    assert!(!fresh.stale);
    let payload = fresh.payload.expect("populated");

    // When: Read six minutes later
    clock.advance(Duration::from_secs(360));
    let stale = cache.get_bulk();

    // Then: Same payload, flagged stale so the caller triggers a refresh
    assert!(stale.stale);
    assert_eq!(stale.payload.expect("still served"), payload);
}

#[tokio::test]
async fn tiers_expire_independently() {
    // Given: Nation (5 min TTL) and alliance (30 min TTL) entries of one age
    let source = Arc::new(FakeSource::new());
    let (clock, cache) = cache_over(source);
    cache
        .refresh(TierId::Nation, Some(1))
        .await
        .expect("populate nation");
    cache
        .refresh(TierId::Alliance, Some(2))
        .await
        .expect("populate alliance");

    // When: Ten minutes pass
    clock.advance(Duration::from_secs(600));

    // Then: The nation snapshot is stale, the alliance snapshot is not
    assert!(cache.get_nation(1).stale);
    assert!(!cache.get_alliance(2).stale);
}

// =============================================================================
// Write Path: Validation
// =============================================================================

#[tokio::test]
async fn when_a_refresh_yields_an_invalid_snapshot_the_prior_payload_survives() {
    // Given: A populated bulk tier
    let source = Arc::new(FakeSource::new());
    let (_, cache) = cache_over(source.clone());
    cache.refresh(TierId::Bulk, None).await.expect("populate");
    let before = cache.get_bulk().payload.expect("populated");

    // When: The next refresh produces an undecodable snapshot
    source.produce_invalid();
    let outcome = cache.refresh(TierId::Bulk, None).await;

    // Then: The failure is absorbed, not raised, and readers see old data
    assert!(outcome.is_ok());
    assert_eq!(cache.get_bulk().payload.expect("retained"), before);
}

#[tokio::test]
async fn when_the_first_ever_refresh_is_invalid_the_tier_stays_absent() {
    let source = Arc::new(FakeSource::new());
    source.produce_invalid();
    let (_, cache) = cache_over(source);

    let outcome = cache.refresh(TierId::Bulk, None).await;

    assert!(outcome.is_ok());
    assert!(cache.get_bulk().payload.is_none());
}

// =============================================================================
// Refresh Collapse
// =============================================================================

#[tokio::test]
async fn concurrent_refreshes_of_one_key_collapse_into_a_single_fetch() {
    // Given: A gated source holding the first fetch in flight
    let source = Arc::new(FakeSource::gated());
    let (_, cache) = cache_over(source.clone());

    // When: Two refreshes race for the same tier+key
    let first = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh(TierId::Bulk, None).await }
    });
    let second = tokio::spawn({
        let cache = cache.clone();
        async move { cache.refresh(TierId::Bulk, None).await }
    });

    // Let both tasks reach the in-flight registry, then release one permit.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    source.release(1);

    let first = first.await.expect("task completed");
    let second = second.await.expect("task completed");

    // Then: Both callers succeed off exactly one upstream fetch
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(source.bulk_calls.load(Ordering::SeqCst), 1);
    assert!(cache.get_bulk().payload.is_some());
}

#[tokio::test]
async fn refreshes_of_different_keys_do_not_collapse() {
    // Given: Two different nation keys
    let source = Arc::new(FakeSource::new());
    let (_, cache) = cache_over(source.clone());

    // When: Both are refreshed
    cache
        .refresh(TierId::Nation, Some(1))
        .await
        .expect("refresh 1");
    cache
        .refresh(TierId::Nation, Some(2))
        .await
        .expect("refresh 2");

    // Then: Each got its own fetch
    assert_eq!(source.nation_calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Sweeps and Invalidation
// =============================================================================

#[tokio::test]
async fn a_keyless_refresh_sweeps_every_cached_entry_of_the_tier() {
    // Given: Two cached nations
    let source = Arc::new(FakeSource::new());
    let (_, cache) = cache_over(source.clone());
    cache.refresh(TierId::Nation, Some(1)).await.expect("seed 1");
    cache.refresh(TierId::Nation, Some(2)).await.expect("seed 2");

    // When: The tier is swept
    cache.refresh(TierId::Nation, None).await.expect("sweep");

    // Then: Both entries were refetched
    assert_eq!(source.nation_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn invalidation_is_the_only_way_an_entry_disappears() {
    let source = Arc::new(FakeSource::new());
    let (_, cache) = cache_over(source);
    cache.refresh(TierId::Nation, Some(1)).await.expect("seed");

    assert!(cache.get_nation(1).payload.is_some());
    cache.invalidate(TierId::Nation, Some(1));
    assert!(cache.get_nation(1).payload.is_none());
}
