//! # PnW Core
//!
//! Scoped API-key pool, rate-limited fetch dispatcher, and tiered cache for
//! the Politics & War data API.
//!
//! ## Overview
//!
//! This crate is the data plane a Discord-facing bot builds on:
//!
//! - **Scoped credential pool** with least-loaded key selection
//! - **Health monitor** with timed auto-recovery per key
//! - **Rolling-window rate limiter** (1000 calls/hour/key)
//! - **Fetch dispatcher** with retry, backoff, and failover across the pool
//! - **Tiered cache** (bulk / nation / alliance) with stale-serving reads,
//!   validated wholesale writes, and single-flight refresh collapse
//! - **Background scheduler** refreshing each tier at its TTL cadence
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Tiered stores, snapshot source trait, single-flight refresh |
//! | [`client`] | `PwClient` facade consumed by the command layer |
//! | [`clock`] | Clock and sleep seams (deterministic impls for tests) |
//! | [`config`] | Startup configuration and env loading |
//! | [`credentials`] | Credential pool and selection |
//! | [`dispatcher`] | Attempt state machine over the pool |
//! | [`domain`] | Decoded upstream payloads and validation |
//! | [`error`] | `FetchError` / `ConfigError` taxonomy |
//! | [`health`] | Per-key failure tracking |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`rate_limit`] | Per-key quota accounting |
//! | [`retry`] | Backoff schedules |
//! | [`scheduler`] | Per-tier refresh timers |
//! | [`scope`] | Key-pool scopes |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pnw_core::{ApiConfig, PwClient, Scope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApiConfig::from_env()?;
//!     let client = PwClient::new(config)?;
//!     let _scheduler = client.start_scheduler();
//!
//!     let nation = client.fetch_nation(590508).await?;
//!     println!("{} ({:.1} score)", nation.nation_name, nation.score);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Command layer  │  (excluded collaborator)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │    PwClient     │────▶│  Tiered Cache    │──┐ single-flight,
//! └────────┬────────┘     └──────────────────┘  │ validated commits
//!          │                        │           │
//!          ▼                        ▼           │
//! ┌─────────────────┐     ┌──────────────────┐  │
//! │ Fetch Dispatcher│◀────│ Refresh Scheduler│◀─┘
//! └────────┬────────┘     └──────────────────┘
//!          │ ranked keys, quota, health
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Credential Pool │────▶│ Rate Limiter /   │
//! │   (per scope)   │     │ Health Monitor   │
//! └────────┬────────┘     └──────────────────┘
//!          ▼
//! ┌─────────────────┐
//! │  HTTP transport │  (reqwest or injected)
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Transient upstream and transport faults are retried inside the
//! dispatcher up to its attempt cap; only exhaustion surfaces, as a typed
//! [`FetchError`]. Cache validation failures never surface at all: readers
//! keep getting the previous snapshot while the failure is logged.
//!
//! ## Security
//!
//! - API keys are read from the environment and never logged; `Credential`
//!   redacts its secret in `Debug` output
//! - All HTTP requests use TLS via rustls

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod health;
pub mod http_client;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod scope;

// Re-export commonly used types at crate root for convenience

pub use cache::{
    CacheRead, CacheStats, SnapshotError, SnapshotFuture, SnapshotSource, TierId, TierStats,
    TieredCache,
};
pub use client::PwClient;
pub use clock::{Clock, ManualClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use config::{ApiConfig, TierTtls};
pub use credentials::{Credential, CredentialId, CredentialPool, PoolStats, ScopeStats};
pub use dispatcher::{ApiRequest, FetchDispatcher};
pub use domain::{
    Alliance, AllianceId, AllianceSummary, BulkDataset, City, Nation, NationId, NationSummary,
    ValidationError, WarRecord,
};
pub use error::{ConfigError, FetchError};
pub use health::{HealthMonitor, HealthStatus};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient,
};
pub use rate_limit::RateLimiter;
pub use retry::{Backoff, RetryConfig};
pub use scheduler::RefreshScheduler;
pub use scope::Scope;
