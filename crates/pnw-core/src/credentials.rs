//! Scoped credential pool with health-aware, least-loaded selection.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::FetchError;
use crate::health::HealthMonitor;
use crate::rate_limit::RateLimiter;
use crate::Scope;

/// Dense index assigned to a credential at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CredentialId(pub u32);

impl Display for CredentialId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "key#{}", self.0)
    }
}

/// An API key bound to one scope. Read-only after load.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    id: CredentialId,
    scope: Scope,
    secret: String,
}

impl Credential {
    pub fn new(id: CredentialId, scope: Scope, secret: impl Into<String>) -> Self {
        Self {
            id,
            scope,
            secret: secret.into(),
        }
    }

    pub const fn id(&self) -> CredentialId {
        self.id
    }

    pub const fn scope(&self) -> Scope {
        self.scope
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

// Secrets must never reach logs or error chains.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Per-scope usage and health summary, the `pool_stats` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeStats {
    pub total_calls: u32,
    pub healthy_count: u32,
    pub unhealthy_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub per_scope: BTreeMap<Scope, ScopeStats>,
}

/// Holds the loaded credentials and selects keys for outbound calls.
///
/// Selection is least-loaded, not round-robin: among healthy candidates the
/// lowest current call count wins, with ties broken by a rotating stable
/// offset so equally loaded keys share traffic evenly. When every key in a
/// scope is unhealthy the full scope list is used instead (fail open rather
/// than blocking the caller on health alone).
pub struct CredentialPool {
    by_scope: HashMap<Scope, Vec<Credential>>,
    rotation: HashMap<Scope, AtomicUsize>,
    health: Arc<HealthMonitor>,
    limiter: Arc<RateLimiter>,
}

impl CredentialPool {
    pub fn new(
        credentials: Vec<Credential>,
        health: Arc<HealthMonitor>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let mut by_scope: HashMap<Scope, Vec<Credential>> = HashMap::new();
        for credential in credentials {
            by_scope.entry(credential.scope()).or_default().push(credential);
        }
        let rotation = by_scope
            .keys()
            .map(|scope| (*scope, AtomicUsize::new(0)))
            .collect();
        Self {
            by_scope,
            rotation,
            health,
            limiter,
        }
    }

    /// Best candidate for the scope right now. Selection does not consume
    /// quota; that happens only when a call is actually attempted.
    pub fn acquire(&self, scope: Scope) -> Result<Credential, FetchError> {
        let mut ranked = self.ranked(scope)?;
        Ok(ranked.remove(0))
    }

    /// Full candidate list for the scope, best first, so the dispatcher can
    /// walk next-best keys without re-entering selection. The list is never
    /// empty on success.
    pub fn ranked(&self, scope: Scope) -> Result<Vec<Credential>, FetchError> {
        let credentials = self
            .by_scope
            .get(&scope)
            .filter(|list| !list.is_empty())
            .ok_or(FetchError::NoCredentialForScope(scope))?;

        let healthy: Vec<&Credential> = credentials
            .iter()
            .filter(|credential| self.health.is_healthy(credential.id()))
            .collect();
        let candidates: Vec<&Credential> = if healthy.is_empty() {
            credentials.iter().collect()
        } else {
            healthy
        };

        let offset = self
            .rotation
            .get(&scope)
            .map(|index| index.fetch_add(1, Ordering::Relaxed))
            .unwrap_or(0)
            % candidates.len();

        let mut rotated: Vec<Credential> = (0..candidates.len())
            .map(|i| candidates[(offset + i) % candidates.len()].clone())
            .collect();
        // Stable sort keeps the rotated order among equal counts.
        rotated.sort_by_key(|credential| self.limiter.current_usage(credential.id()));
        Ok(rotated)
    }

    /// Number of credentials configured for a scope.
    pub fn scope_len(&self, scope: Scope) -> usize {
        self.by_scope.get(&scope).map_or(0, Vec::len)
    }

    /// Read-only diagnostics over every configured scope.
    pub fn stats(&self) -> PoolStats {
        let mut per_scope = BTreeMap::new();
        for (scope, credentials) in &self.by_scope {
            let mut stats = ScopeStats {
                total_calls: 0,
                healthy_count: 0,
                unhealthy_count: 0,
            };
            for credential in credentials {
                stats.total_calls += self.limiter.current_usage(credential.id());
                if self.health.is_healthy(credential.id()) {
                    stats.healthy_count += 1;
                } else {
                    stats.unhealthy_count += 1;
                }
            }
            per_scope.insert(*scope, stats);
        }
        PoolStats { per_scope }
    }

    /// Administrative reset: every key healthy, every counter zeroed.
    pub fn reset(&self) {
        self.health.reset();
        self.limiter.reset();
    }
}
