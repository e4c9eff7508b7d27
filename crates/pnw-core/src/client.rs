//! Library facade wiring the pool, dispatcher, cache, and scheduler.
//!
//! This is the surface the command layer consumes: typed entity fetches
//! that go through cache then dispatcher, administrative refresh and reset,
//! and read-only diagnostics.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::cache::{
    CacheStats, SnapshotError, SnapshotFuture, SnapshotSource, TierId, TieredCache,
};
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::config::{ApiConfig, TierTtls};
use crate::credentials::{CredentialPool, PoolStats};
use crate::dispatcher::{ApiRequest, FetchDispatcher};
use crate::domain::{
    Alliance, AllianceId, AllianceSummary, BulkDataset, Nation, NationId, NationSummary, WarRecord,
};
use crate::error::{ConfigError, FetchError};
use crate::health::HealthMonitor;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::rate_limit::RateLimiter;
use crate::scheduler::RefreshScheduler;
use crate::Scope;

/// Client for the upstream game data API.
///
/// Owns the scoped credential pool and the cache tiers; every feature of
/// the consuming bot goes through here. Cheap to share behind an `Arc`.
pub struct PwClient {
    pool: Arc<CredentialPool>,
    dispatcher: Arc<FetchDispatcher>,
    cache: Arc<TieredCache>,
    ttls: TierTtls,
}

impl PwClient {
    /// Production construction: real transport, system clock, tokio timer.
    pub fn new(config: ApiConfig) -> Result<Self, ConfigError> {
        Self::with_parts(
            config,
            Arc::new(ReqwestHttpClient::new()),
            Arc::new(SystemClock),
            Arc::new(TokioSleeper),
        )
    }

    /// Construction with injected transport and time seams. Used by tests
    /// and by embedders that manage their own HTTP client.
    pub fn with_parts(
        config: ApiConfig,
        transport: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let health = Arc::new(HealthMonitor::new(clock.clone(), config.recovery_period));
        let limiter = Arc::new(RateLimiter::new(
            clock.clone(),
            config.quota_window,
            config.quota_limit,
        ));
        let pool = Arc::new(CredentialPool::new(
            config.credentials(),
            health.clone(),
            limiter.clone(),
        ));
        let dispatcher = Arc::new(FetchDispatcher::new(
            &config,
            pool.clone(),
            limiter,
            health,
            transport,
            sleeper,
        ));
        let source = Arc::new(GqlSnapshotSource {
            dispatcher: dispatcher.clone(),
            bulk_page_size: config.bulk_page_size,
            bulk_page_cap: config.bulk_page_cap,
        });
        let cache = Arc::new(TieredCache::new(source, clock, config.ttls));

        Ok(Self {
            pool,
            dispatcher,
            cache,
            ttls: config.ttls,
        })
    }

    /// Nation snapshot, cache first. A stale hit is served immediately and
    /// schedules a detached refresh; only a miss waits on the network.
    pub async fn fetch_nation(&self, id: NationId) -> Result<Arc<Nation>, FetchError> {
        let read = self.cache.get_nation(id);
        if let Some(payload) = read.payload {
            if read.stale {
                self.spawn_refresh(TierId::Nation, Some(id));
            }
            return Ok(payload);
        }

        self.cache.refresh(TierId::Nation, Some(id)).await?;
        self.cache
            .get_nation(id)
            .payload
            .ok_or_else(|| FetchError::InvalidRequest {
                reason: format!("nation {id} unavailable"),
            })
    }

    /// Alliance snapshot, cache first, same staleness policy.
    pub async fn fetch_alliance(&self, id: AllianceId) -> Result<Arc<Alliance>, FetchError> {
        let read = self.cache.get_alliance(id);
        if let Some(payload) = read.payload {
            if read.stale {
                self.spawn_refresh(TierId::Alliance, Some(id));
            }
            return Ok(payload);
        }

        self.cache.refresh(TierId::Alliance, Some(id)).await?;
        self.cache
            .get_alliance(id)
            .payload
            .ok_or_else(|| FetchError::InvalidRequest {
                reason: format!("alliance {id} unavailable"),
            })
    }

    /// Wholesale world snapshot, cache first, same staleness policy.
    pub async fn fetch_bulk_dataset(&self) -> Result<Arc<BulkDataset>, FetchError> {
        let read = self.cache.get_bulk();
        if let Some(payload) = read.payload {
            if read.stale {
                self.spawn_refresh(TierId::Bulk, None);
            }
            return Ok(payload);
        }

        self.cache.refresh(TierId::Bulk, None).await?;
        self.cache
            .get_bulk()
            .payload
            .ok_or_else(|| FetchError::UpstreamUnavailable {
                reason: String::from("bulk snapshot could not be assembled"),
            })
    }

    /// Administrative refresh: bypasses the TTL but not the collapse of
    /// concurrent refreshes of the same tier+key.
    pub async fn force_refresh(&self, tier: TierId, key: Option<u32>) -> Result<(), FetchError> {
        self.cache.refresh(tier, key).await
    }

    /// Run an arbitrary GraphQL document through the pool and dispatcher.
    /// Escape hatch for command handlers whose queries have no snapshot
    /// shape; returns the raw body.
    pub async fn execute_raw(
        &self,
        scope: Scope,
        query: impl Into<String>,
    ) -> Result<String, FetchError> {
        let request = ApiRequest::graphql(query)?;
        self.dispatcher.execute(scope, &request).await
    }

    /// Start the per-tier background refresh timers.
    pub fn start_scheduler(&self) -> RefreshScheduler {
        RefreshScheduler::spawn(self.cache.clone(), self.ttls)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Administrative reset: every key healthy, every usage counter zeroed.
    pub fn reset_keys(&self) {
        self.pool.reset();
    }

    pub fn invalidate(&self, tier: TierId, key: Option<u32>) {
        self.cache.invalidate(tier, key);
    }

    fn spawn_refresh(&self, tier: TierId, key: Option<u32>) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            if let Err(error) = cache.refresh(tier, key).await {
                warn!(%tier, key, error = %error, "background refresh failed");
            }
        });
    }
}

/// Snapshot fetches expressed as GraphQL documents over the dispatcher.
struct GqlSnapshotSource {
    dispatcher: Arc<FetchDispatcher>,
    bulk_page_size: u32,
    bulk_page_cap: u32,
}

impl SnapshotSource for GqlSnapshotSource {
    fn bulk<'a>(&'a self) -> SnapshotFuture<'a, BulkDataset> {
        Box::pin(async move {
            let mut nations: Vec<NationSummary> = Vec::new();
            let mut page = 1u32;
            loop {
                let body = self
                    .run(Scope::Broad, bulk_nations_query(self.bulk_page_size, page))
                    .await?;
                let data: NationsData<NationSummary> = decode(&body)?;
                let has_more = data
                    .nations
                    .paginator_info
                    .map(|info| info.has_more_pages)
                    .unwrap_or(false);
                nations.extend(data.nations.data);
                if !has_more || page >= self.bulk_page_cap {
                    break;
                }
                page += 1;
            }

            let body = self.run(Scope::Broad, bulk_wars_query()).await?;
            let wars: WarsData = decode(&body)?;

            let body = self.run(Scope::Broad, bulk_alliances_query()).await?;
            let alliances: AlliancesData<AllianceSummary> = decode(&body)?;

            Ok(BulkDataset {
                nations,
                wars: wars.wars.data,
                alliances: alliances.alliances.data,
            })
        })
    }

    fn nation<'a>(&'a self, id: NationId) -> SnapshotFuture<'a, Nation> {
        Box::pin(async move {
            let body = self.run(Scope::Broad, nation_query(id)).await?;
            let data: NationsData<Nation> = decode(&body)?;
            data.nations.data.into_iter().next().ok_or_else(|| {
                SnapshotError::Invalid(format!("nation {id} not present in response"))
            })
        })
    }

    fn alliance<'a>(&'a self, id: AllianceId) -> SnapshotFuture<'a, Alliance> {
        Box::pin(async move {
            let body = self.run(Scope::Alliance, alliance_query(id)).await?;
            let data: AlliancesData<Alliance> = decode(&body)?;
            data.alliances.data.into_iter().next().ok_or_else(|| {
                SnapshotError::Invalid(format!("alliance {id} not present in response"))
            })
        })
    }
}

impl GqlSnapshotSource {
    async fn run(&self, scope: Scope, query: String) -> Result<String, SnapshotError> {
        let request = ApiRequest::graphql(query).map_err(SnapshotError::Fetch)?;
        Ok(self.dispatcher.execute(scope, &request).await?)
    }
}

// GraphQL envelopes. Only the fields the snapshots need are decoded.

#[derive(Deserialize)]
struct GqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GqlErrorMessage>,
}

#[derive(Deserialize)]
struct GqlErrorMessage {
    message: String,
}

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default, rename = "paginatorInfo")]
    paginator_info: Option<PaginatorInfo>,
}

#[derive(Deserialize)]
struct PaginatorInfo {
    #[serde(default, rename = "hasMorePages")]
    has_more_pages: bool,
}

#[derive(Deserialize)]
struct NationsData<T> {
    nations: Page<T>,
}

#[derive(Deserialize)]
struct WarsData {
    wars: Page<WarRecord>,
}

#[derive(Deserialize)]
struct AlliancesData<T> {
    alliances: Page<T>,
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, SnapshotError> {
    let response: GqlResponse<T> = serde_json::from_str(body)
        .map_err(|error| SnapshotError::Invalid(format!("undecodable response body: {error}")))?;
    if let Some(error) = response.errors.first() {
        return Err(SnapshotError::Invalid(format!(
            "upstream error: {}",
            error.message
        )));
    }
    response
        .data
        .ok_or_else(|| SnapshotError::Invalid(String::from("response carried no data")))
}

fn nation_query(id: NationId) -> String {
    format!(
        "{{nations(id: [{id}], first: 1) {{data {{id nation_name leader_name score alliance_id \
         alliance_position last_active soldiers tanks aircraft ships missiles nukes spies \
         beige_turns vmode cities {{id infrastructure barracks factory hangar drydock}}}}}}}}"
    )
}

fn alliance_query(id: AllianceId) -> String {
    format!(
        "{{alliances(id: [{id}], first: 1) {{data {{id name acronym score rank members}}}}}}"
    )
}

fn bulk_nations_query(page_size: u32, page: u32) -> String {
    format!(
        "{{nations(first: {page_size}, page: {page}) {{paginatorInfo {{hasMorePages}} \
         data {{id nation_name alliance_id score num_cities soldiers tanks aircraft ships \
         beige_turns vmode}}}}}}"
    )
}

fn bulk_wars_query() -> String {
    String::from("{wars(active: true, first: 1000) {data {id att_id def_id turns_left}}}")
}

fn bulk_alliances_query() -> String {
    String::from("{alliances(first: 100) {data {id name score rank}}}")
}
