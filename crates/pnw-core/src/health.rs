//! Per-credential failure tracking with timed auto-recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::credentials::CredentialId;

/// Health of a single credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug)]
struct HealthRecord {
    status: HealthStatus,
    last_error: Option<String>,
    marked_unhealthy_at: Option<Instant>,
}

/// Tracks per-credential failure state.
///
/// Recovery is applied lazily on read: a credential marked unhealthy reads
/// as healthy again once the recovery period has elapsed, with no background
/// timer involved. No credential is ever permanently blacklisted.
pub struct HealthMonitor {
    clock: Arc<dyn Clock>,
    recovery_period: Duration,
    records: RwLock<HashMap<CredentialId, Mutex<HealthRecord>>>,
}

impl HealthMonitor {
    pub fn new(clock: Arc<dyn Clock>, recovery_period: Duration) -> Self {
        Self {
            clock,
            recovery_period,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Record a failure cause and timestamp the transition. A later failure
    /// overwrites an earlier one; the latest cause wins.
    pub fn mark_unhealthy(&self, id: CredentialId, reason: impl Into<String>) {
        let now = self.clock.now();
        let reason = reason.into();
        self.with_record(id, |record| {
            record.status = HealthStatus::Unhealthy;
            record.last_error = Some(reason);
            record.marked_unhealthy_at = Some(now);
        });
    }

    /// Read path used by pool selection. Applies the recovery rule before
    /// answering, so mere passage of time heals a credential.
    pub fn is_healthy(&self, id: CredentialId) -> bool {
        let records = self.records.read().expect("health map lock is not poisoned");
        let Some(cell) = records.get(&id) else {
            // Never-seen credentials are healthy; no record is allocated
            // until the first failure.
            return true;
        };
        let mut record = cell.lock().expect("health record lock is not poisoned");
        self.apply_recovery(&mut record);
        record.status == HealthStatus::Healthy
    }

    /// Most recent failure cause, if the credential is currently unhealthy.
    pub fn last_error(&self, id: CredentialId) -> Option<String> {
        let records = self.records.read().expect("health map lock is not poisoned");
        let cell = records.get(&id)?;
        let mut record = cell.lock().expect("health record lock is not poisoned");
        self.apply_recovery(&mut record);
        record.last_error.clone()
    }

    /// Return every tracked credential to healthy.
    pub fn reset(&self) {
        let records = self.records.read().expect("health map lock is not poisoned");
        for cell in records.values() {
            let mut record = cell.lock().expect("health record lock is not poisoned");
            record.status = HealthStatus::Healthy;
            record.last_error = None;
            record.marked_unhealthy_at = None;
        }
    }

    fn apply_recovery(&self, record: &mut HealthRecord) {
        if record.status == HealthStatus::Unhealthy {
            let recovered = record
                .marked_unhealthy_at
                .map(|at| self.clock.now().duration_since(at) >= self.recovery_period)
                .unwrap_or(true);
            if recovered {
                record.status = HealthStatus::Healthy;
                record.last_error = None;
                record.marked_unhealthy_at = None;
            }
        }
    }

    fn with_record<R>(&self, id: CredentialId, f: impl FnOnce(&mut HealthRecord) -> R) -> R {
        {
            let records = self.records.read().expect("health map lock is not poisoned");
            if let Some(cell) = records.get(&id) {
                let mut record = cell.lock().expect("health record lock is not poisoned");
                return f(&mut record);
            }
        }

        let mut records = self.records.write().expect("health map lock is not poisoned");
        let cell = records.entry(id).or_insert_with(|| {
            Mutex::new(HealthRecord {
                status: HealthStatus::Healthy,
                last_error: None,
                marked_unhealthy_at: None,
            })
        });
        let mut record = cell.lock().expect("health record lock is not poisoned");
        f(&mut record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const RECOVERY: Duration = Duration::from_secs(300);

    fn monitor() -> (Arc<ManualClock>, HealthMonitor) {
        let clock = Arc::new(ManualClock::new());
        let monitor = HealthMonitor::new(clock.clone(), RECOVERY);
        (clock, monitor)
    }

    #[test]
    fn unknown_credential_reads_healthy() {
        let (_, monitor) = monitor();
        assert!(monitor.is_healthy(CredentialId(7)));
    }

    #[test]
    fn marked_credential_reads_unhealthy_until_recovery() {
        let (clock, monitor) = monitor();
        let id = CredentialId(0);

        monitor.mark_unhealthy(id, "rate limited");
        assert!(!monitor.is_healthy(id));
        assert_eq!(monitor.last_error(id).as_deref(), Some("rate limited"));

        clock.advance(RECOVERY - Duration::from_secs(1));
        assert!(!monitor.is_healthy(id));

        clock.advance(Duration::from_secs(1));
        assert!(monitor.is_healthy(id));
        assert_eq!(monitor.last_error(id), None);
    }

    #[test]
    fn later_failure_overwrites_earlier_cause_and_timestamp() {
        let (clock, monitor) = monitor();
        let id = CredentialId(1);

        monitor.mark_unhealthy(id, "connection refused");
        clock.advance(Duration::from_secs(200));
        monitor.mark_unhealthy(id, "rate limited");
        assert_eq!(monitor.last_error(id).as_deref(), Some("rate limited"));

        // Recovery counts from the second failure.
        clock.advance(Duration::from_secs(200));
        assert!(!monitor.is_healthy(id));
        clock.advance(Duration::from_secs(100));
        assert!(monitor.is_healthy(id));
    }

    #[test]
    fn reset_heals_everything_immediately() {
        let (_, monitor) = monitor();
        monitor.mark_unhealthy(CredentialId(0), "boom");
        monitor.mark_unhealthy(CredentialId(1), "boom");

        monitor.reset();

        assert!(monitor.is_healthy(CredentialId(0)));
        assert!(monitor.is_healthy(CredentialId(1)));
    }
}
