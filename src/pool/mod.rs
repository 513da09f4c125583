//! Upstream credential pool
//!
//! Owns every credential's mutable state behind one lock. Requests take a
//! [`Lease`] on a credential and give it back exactly once with an outcome;
//! the outcome drives the credential lifecycle:
//!
//! ```text
//! fresh <-> in_use --(401/403, TTL, failure threshold)--> expired --(sign-in)--> fresh
//!                                                            |
//!                                                  (no secrets)--> revoked
//! ```
//!
//! Waiters blocked in [`CredentialPool::lease`] are woken on every release and
//! refresh, and give up after the configured lease timeout.

pub mod credential;
mod lease;
pub mod refresh;

pub use credential::{
    Credential, CredentialId, CredentialSpec, CredentialStatus, Secrets, mask_token,
};
pub use lease::{Lease, ReleaseOutcome};
pub use refresh::{Authenticator, AuthError, RefreshSummary};

use crate::config::{PoolConfig, SelectionStrategy};
use crate::error::{AppError, AppResult};
use crate::metrics::{AlertReason, LeaseResult, Metrics};
use crate::middleware::RequestId;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Pool behaviour derived from `[pool]` configuration
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub selection: SelectionStrategy,
    pub max_concurrent_per_credential: usize,
    pub lease_timeout: Duration,
    pub failure_threshold: u32,
    pub token_ttl: Option<Duration>,
    pub auto_refresh_interval: Option<Duration>,
    pub sign_in_timeout: Duration,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            selection: config.selection,
            max_concurrent_per_credential: config.max_concurrent_per_credential,
            lease_timeout: config.lease_timeout(),
            failure_threshold: config.failure_threshold,
            token_ttl: config.token_ttl(),
            auto_refresh_interval: config.auto_refresh_interval(),
            sign_in_timeout: config.sign_in_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Available,
    Expired,
    Revoked,
}

struct Slot {
    credential: Credential,
    state: SlotState,
    /// Bumped whenever the token is replaced; stale releases are ignored
    generation: u64,
    failure_count: u32,
    in_flight: usize,
    last_used_at: Option<Instant>,
    issued_at: Instant,
    refreshing: bool,
}

impl Slot {
    fn status(&self) -> CredentialStatus {
        match self.state {
            SlotState::Available if self.in_flight > 0 => CredentialStatus::InUse,
            SlotState::Available => CredentialStatus::Fresh,
            SlotState::Expired => CredentialStatus::Expired,
            SlotState::Revoked => CredentialStatus::Revoked,
        }
    }
}

struct PoolInner {
    slots: Vec<Slot>,
    /// Next slot to consider for round-robin selection
    cursor: usize,
}

/// Work decided under the lock but performed after releasing it
enum Followup {
    Refresh(CredentialId),
    Alert(CredentialId),
}

enum Acquire {
    Granted(Lease),
    /// Nothing free right now, but a release or refresh may change that
    Busy,
    /// Nothing can become available without operator action
    Exhausted,
}

/// Point-in-time view of one credential for the admin API
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSnapshot {
    pub id: CredentialId,
    pub status: CredentialStatus,
    pub token_hint: String,
    pub has_secrets: bool,
    pub failure_count: u32,
    pub in_flight: usize,
    pub idle_seconds: Option<u64>,
    pub refreshing: bool,
}

/// Status counts for `/health`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub fresh: usize,
    pub in_use: usize,
    pub expired: usize,
    pub revoked: usize,
}

impl PoolSummary {
    /// True when at least one credential can serve a request now or soon
    pub fn is_serving(&self) -> bool {
        self.fresh + self.in_use > 0
    }
}

/// Thread-safe rotating set of upstream credentials
pub struct CredentialPool {
    inner: Mutex<PoolInner>,
    notify: Notify,
    settings: PoolSettings,
    authenticator: Option<Arc<dyn Authenticator>>,
    metrics: Metrics,
}

impl CredentialPool {
    /// Build a pool from configured credentials
    ///
    /// Credentials configured without a token start expired and become usable
    /// once [`CredentialPool::start`] has signed them in.
    pub fn new(
        settings: PoolSettings,
        specs: &[CredentialSpec],
        authenticator: Option<Arc<dyn Authenticator>>,
        metrics: Metrics,
    ) -> Arc<Self> {
        let now = Instant::now();
        let slots = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let id = CredentialId::new(index as u32);
                let state = if spec.token().is_some() {
                    SlotState::Available
                } else {
                    SlotState::Expired
                };
                Slot {
                    credential: Credential::new(
                        id,
                        spec.token().unwrap_or_default(),
                        spec.secrets().cloned(),
                    ),
                    state,
                    generation: 0,
                    failure_count: 0,
                    in_flight: 0,
                    last_used_at: None,
                    issued_at: now,
                    refreshing: false,
                }
            })
            .collect();

        Arc::new(Self {
            inner: Mutex::new(PoolInner { slots, cursor: 0 }),
            notify: Notify::new(),
            settings,
            authenticator,
            metrics,
        })
    }

    /// Start background work: initial sign-in and periodic refresh
    pub fn start(self: &Arc<Self>) {
        let pending: Vec<CredentialId> = {
            let mut inner = self.inner.lock();
            inner
                .slots
                .iter_mut()
                .filter(|slot| slot.state == SlotState::Expired && !slot.refreshing)
                .filter_map(|slot| {
                    if self.authenticator.is_some() && slot.credential.secrets().is_some() {
                        slot.refreshing = true;
                        Some(slot.credential.id())
                    } else {
                        slot.state = SlotState::Revoked;
                        None
                    }
                })
                .collect()
        };

        for id in pending {
            tracing::info!(credential_id = %id, "Signing in credential configured without a token");
            self.spawn_refresh(id);
        }

        if let Some(interval) = self.settings.auto_refresh_interval {
            self.spawn_auto_refresh(interval);
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lease a credential, waiting up to the lease timeout for one to free up
    ///
    /// Fails immediately when no credential could ever become available.
    pub async fn lease(self: &Arc<Self>, request_id: RequestId) -> AppResult<Lease> {
        let deadline = tokio::time::Instant::now() + self.settings.lease_timeout;

        loop {
            // Register interest before checking so a release between the check
            // and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.acquire(request_id) {
                Acquire::Granted(lease) => return Ok(lease),
                Acquire::Exhausted => {
                    self.metrics.record_lease(LeaseResult::Unavailable);
                    tracing::warn!(
                        request_id = %request_id,
                        "No usable upstream credential (pool empty or all revoked)"
                    );
                    return Err(AppError::NoCredentialAvailable);
                }
                Acquire::Busy => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.metrics.record_lease(LeaseResult::TimedOut);
                tracing::warn!(
                    request_id = %request_id,
                    lease_timeout_ms = self.settings.lease_timeout.as_millis() as u64,
                    "Timed out waiting for an upstream credential"
                );
                return Err(AppError::NoCredentialAvailable);
            }
        }
    }

    /// Lease without waiting
    ///
    /// Returns `Ok(None)` when every usable credential is busy.
    pub fn try_lease(self: &Arc<Self>, request_id: RequestId) -> AppResult<Option<Lease>> {
        match self.acquire(request_id) {
            Acquire::Granted(lease) => Ok(Some(lease)),
            Acquire::Busy => Ok(None),
            Acquire::Exhausted => {
                self.metrics.record_lease(LeaseResult::Unavailable);
                Err(AppError::NoCredentialAvailable)
            }
        }
    }

    fn acquire(self: &Arc<Self>, request_id: RequestId) -> Acquire {
        let mut followups = Vec::new();
        let granted = {
            let mut inner = self.inner.lock();
            let now = Instant::now();

            if let Some(ttl) = self.settings.token_ttl {
                for slot in inner.slots.iter_mut() {
                    if slot.state == SlotState::Available && now.duration_since(slot.issued_at) >= ttl
                    {
                        tracing::info!(
                            credential_id = %slot.credential.id(),
                            ttl_seconds = ttl.as_secs(),
                            "Credential token reached its TTL"
                        );
                        followups.push(self.expire_locked(slot));
                    }
                }
            }

            let max = self.settings.max_concurrent_per_credential;
            let candidates: Vec<usize> = inner
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.state == SlotState::Available && slot.in_flight < max)
                .map(|(index, _)| index)
                .collect();

            match self.select(&inner, &candidates) {
                Some(index) => {
                    if self.settings.selection == SelectionStrategy::RoundRobin {
                        inner.cursor = (index + 1) % inner.slots.len();
                    }
                    let slot = &mut inner.slots[index];
                    slot.in_flight += 1;
                    slot.last_used_at = Some(now);
                    Ok((slot.credential.clone(), slot.generation))
                }
                None => {
                    let pending = inner.slots.iter().any(|slot| {
                        slot.state == SlotState::Available
                            || (slot.state == SlotState::Expired && slot.refreshing)
                    });
                    Err(pending)
                }
            }
        };

        for followup in followups {
            self.run_followup(followup);
        }

        match granted {
            Ok((credential, generation)) => {
                self.metrics.record_lease(LeaseResult::Granted);
                tracing::debug!(
                    request_id = %request_id,
                    credential_id = %credential.id(),
                    "Leased upstream credential"
                );
                Acquire::Granted(Lease::new(
                    Arc::clone(self),
                    credential,
                    generation,
                    request_id,
                ))
            }
            Err(true) => Acquire::Busy,
            Err(false) => Acquire::Exhausted,
        }
    }

    fn select(&self, inner: &PoolInner, candidates: &[usize]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        match self.settings.selection {
            SelectionStrategy::RoundRobin => {
                let len = inner.slots.len();
                (0..len)
                    .map(|offset| (inner.cursor + offset) % len)
                    .find(|index| candidates.contains(index))
            }
            SelectionStrategy::LeastRecentlyUsed => candidates
                .iter()
                .copied()
                .min_by_key(|&index| (inner.slots[index].last_used_at, index)),
            SelectionStrategy::Random => {
                let pick = rand::rng().random_range(0..candidates.len());
                Some(candidates[pick])
            }
        }
    }

    /// Take a credential out of rotation; refresh it when secrets allow
    fn expire_locked(&self, slot: &mut Slot) -> Followup {
        let id = slot.credential.id();
        if self.authenticator.is_some() && slot.credential.secrets().is_some() {
            slot.state = SlotState::Expired;
            slot.refreshing = true;
            Followup::Refresh(id)
        } else {
            slot.state = SlotState::Revoked;
            Followup::Alert(id)
        }
    }

    fn run_followup(self: &Arc<Self>, followup: Followup) {
        match followup {
            Followup::Refresh(id) => {
                tracing::info!(credential_id = %id, "Credential expired, refreshing via sign-in");
                self.spawn_refresh(id);
            }
            Followup::Alert(id) => {
                self.metrics.credential_alert(AlertReason::Revoked);
                tracing::error!(
                    credential_id = %id,
                    "Credential revoked and removed from rotation (no sign-in secrets to refresh it)"
                );
            }
        }
    }

    /// Return a leased credential; called exactly once per lease
    fn release(
        self: &Arc<Self>,
        id: CredentialId,
        generation: u64,
        outcome: ReleaseOutcome,
        request_id: RequestId,
    ) {
        let followup = {
            let mut inner = self.inner.lock();
            let Some(slot) = inner.slots.get_mut(id.index()) else {
                return;
            };
            slot.in_flight = slot.in_flight.saturating_sub(1);

            // A release against a replaced token says nothing about the new one.
            let current = slot.generation == generation && slot.state == SlotState::Available;
            match outcome {
                ReleaseOutcome::Success if current => {
                    slot.failure_count = 0;
                    None
                }
                ReleaseOutcome::Failure if current => {
                    slot.failure_count += 1;
                    (slot.failure_count >= self.settings.failure_threshold)
                        .then(|| self.expire_locked(slot))
                }
                ReleaseOutcome::Unauthorized if current => Some(self.expire_locked(slot)),
                _ => None,
            }
        };

        self.metrics.record_release(outcome);
        tracing::debug!(
            request_id = %request_id,
            credential_id = %id,
            outcome = outcome.as_str(),
            "Released upstream credential"
        );

        self.notify.notify_waiters();
        if let Some(followup) = followup {
            self.run_followup(followup);
        }
    }

    /// Credential state for the admin API
    pub fn snapshot(&self) -> Vec<CredentialSnapshot> {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner
            .slots
            .iter()
            .map(|slot| CredentialSnapshot {
                id: slot.credential.id(),
                status: slot.status(),
                token_hint: mask_token(slot.credential.token()),
                has_secrets: slot.credential.secrets().is_some(),
                failure_count: slot.failure_count,
                in_flight: slot.in_flight,
                idle_seconds: slot
                    .last_used_at
                    .map(|at| now.duration_since(at).as_secs()),
                refreshing: slot.refreshing,
            })
            .collect()
    }

    pub fn summary(&self) -> PoolSummary {
        let inner = self.inner.lock();
        let mut summary = PoolSummary {
            total: inner.slots.len(),
            ..PoolSummary::default()
        };
        for slot in &inner.slots {
            match slot.status() {
                CredentialStatus::Fresh => summary.fresh += 1,
                CredentialStatus::InUse => summary.in_use += 1,
                CredentialStatus::Expired => summary.expired += 1,
                CredentialStatus::Revoked => summary.revoked += 1,
            }
        }
        summary
    }

    /// Copy of one credential, for out-of-band checks that bypass leasing
    pub fn credential(&self, id: CredentialId) -> Option<Credential> {
        self.inner
            .lock()
            .slots
            .get(id.index())
            .map(|slot| slot.credential.clone())
    }

    pub fn status(&self, id: CredentialId) -> Option<CredentialStatus> {
        self.inner.lock().slots.get(id.index()).map(Slot::status)
    }

    /// Leases currently held across all credentials
    pub fn in_flight(&self) -> usize {
        self.inner.lock().slots.iter().map(|slot| slot.in_flight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAuthenticator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn sign_in(&self, secrets: &Secrets) -> Result<String, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("{}-token-{}", secrets.email(), n))
        }
    }

    fn settings() -> PoolSettings {
        PoolSettings {
            selection: SelectionStrategy::RoundRobin,
            max_concurrent_per_credential: 1,
            lease_timeout: Duration::from_millis(100),
            failure_threshold: 2,
            token_ttl: None,
            auto_refresh_interval: None,
            sign_in_timeout: Duration::from_secs(30),
        }
    }

    fn specs(raw: &[&str]) -> Vec<CredentialSpec> {
        raw.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn pool(raw: &[&str], settings: PoolSettings) -> Arc<CredentialPool> {
        CredentialPool::new(settings, &specs(raw), None, Metrics::new().unwrap())
    }

    #[test]
    fn test_round_robin_rotates_through_credentials() {
        let pool = pool(&["tok-a", "tok-b", "tok-c"], settings());
        let mut seen = Vec::new();
        for _ in 0..4 {
            let lease = pool.try_lease(RequestId::new()).unwrap().unwrap();
            seen.push(lease.credential().token().to_string());
            lease.succeed();
        }
        assert_eq!(seen, vec!["tok-a", "tok-b", "tok-c", "tok-a"]);
    }

    #[test]
    fn test_exclusive_credential_is_not_leased_twice() {
        let pool = pool(&["tok-a"], settings());
        let first = pool.try_lease(RequestId::new()).unwrap();
        assert!(first.is_some());
        assert!(pool.try_lease(RequestId::new()).unwrap().is_none());
        assert_eq!(pool.status(CredentialId::new(0)), Some(CredentialStatus::InUse));

        drop(first);
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.try_lease(RequestId::new()).unwrap().is_some());
    }

    #[test]
    fn test_shared_leasing_respects_concurrency_limit() {
        let mut s = settings();
        s.max_concurrent_per_credential = 2;
        let pool = pool(&["tok-a"], s);
        let a = pool.try_lease(RequestId::new()).unwrap();
        let b = pool.try_lease(RequestId::new()).unwrap();
        assert!(a.is_some() && b.is_some());
        assert!(pool.try_lease(RequestId::new()).unwrap().is_none());
    }

    #[test]
    fn test_least_recently_used_prefers_idle_credential() {
        let mut s = settings();
        s.selection = SelectionStrategy::LeastRecentlyUsed;
        let pool = pool(&["tok-a", "tok-b"], s);

        let first = pool.try_lease(RequestId::new()).unwrap().unwrap();
        assert_eq!(first.credential().token(), "tok-a");
        first.succeed();

        let second = pool.try_lease(RequestId::new()).unwrap().unwrap();
        assert_eq!(second.credential().token(), "tok-b");
    }

    #[test]
    fn test_random_selection_only_returns_free_credentials() {
        let mut s = settings();
        s.selection = SelectionStrategy::Random;
        let pool = pool(&["tok-a", "tok-b"], s);
        let a = pool.try_lease(RequestId::new()).unwrap().unwrap();
        let b = pool.try_lease(RequestId::new()).unwrap().unwrap();
        assert_ne!(a.credential().id(), b.credential().id());
    }

    #[test]
    fn test_failures_past_threshold_revoke_credential_without_secrets() {
        let metrics = Metrics::new().unwrap();
        let pool = CredentialPool::new(settings(), &specs(&["tok-a"]), None, metrics.clone());

        pool.try_lease(RequestId::new()).unwrap().unwrap().fail();
        assert_eq!(pool.status(CredentialId::new(0)), Some(CredentialStatus::Fresh));

        pool.try_lease(RequestId::new()).unwrap().unwrap().fail();
        assert_eq!(pool.status(CredentialId::new(0)), Some(CredentialStatus::Revoked));
        assert_eq!(metrics.alert_count(AlertReason::Revoked), 1);

        let err = pool.try_lease(RequestId::new()).unwrap_err();
        assert!(matches!(err, AppError::NoCredentialAvailable));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let pool = pool(&["tok-a"], settings());
        pool.try_lease(RequestId::new()).unwrap().unwrap().fail();
        pool.try_lease(RequestId::new()).unwrap().unwrap().succeed();
        pool.try_lease(RequestId::new()).unwrap().unwrap().fail();
        assert_eq!(pool.status(CredentialId::new(0)), Some(CredentialStatus::Fresh));
        assert_eq!(pool.snapshot()[0].failure_count, 1);
    }

    #[test]
    fn test_cancelled_release_leaves_counters_alone() {
        let metrics = Metrics::new().unwrap();
        let pool = CredentialPool::new(settings(), &specs(&["tok-a"]), None, metrics.clone());
        pool.try_lease(RequestId::new()).unwrap().unwrap().fail();
        drop(pool.try_lease(RequestId::new()).unwrap().unwrap());

        assert_eq!(pool.snapshot()[0].failure_count, 1);
        assert_eq!(metrics.release_count(ReleaseOutcome::Cancelled), 1);
        assert_eq!(metrics.active_leases(), 0);
    }

    #[test]
    fn test_empty_pool_fails_immediately() {
        let pool = pool(&[], settings());
        assert!(pool.is_empty());
        assert!(matches!(
            pool.try_lease(RequestId::new()),
            Err(AppError::NoCredentialAvailable)
        ));
    }

    #[test]
    fn test_summary_counts_statuses() {
        let pool = pool(&["tok-a", "tok-b"], settings());
        let _held = pool.try_lease(RequestId::new()).unwrap().unwrap();
        let summary = pool.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.in_use, 1);
        assert_eq!(summary.fresh, 1);
        assert!(summary.is_serving());
    }

    #[test]
    fn test_snapshot_masks_tokens() {
        let pool = pool(&["supersecrettoken"], settings());
        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].token_hint, "supers***");
        assert!(!snapshot[0].has_secrets);
    }

    #[tokio::test]
    async fn test_lease_waits_for_release() {
        let mut s = settings();
        s.lease_timeout = Duration::from_secs(2);
        let pool = pool(&["tok-a"], s);
        let held = pool.lease(RequestId::new()).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.lease(RequestId::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        held.succeed();

        let lease = waiter.await.unwrap().expect("waiter should get the credential");
        assert_eq!(lease.credential().token(), "tok-a");
    }

    #[tokio::test]
    async fn test_lease_times_out_when_pool_busy() {
        let metrics = Metrics::new().unwrap();
        let pool = CredentialPool::new(settings(), &specs(&["tok-a"]), None, metrics.clone());
        let _held = pool.lease(RequestId::new()).await.unwrap();

        let started = Instant::now();
        let result = pool.lease(RequestId::new()).await;
        assert!(matches!(result, Err(AppError::NoCredentialAvailable)));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(metrics.lease_count(LeaseResult::TimedOut), 1);
    }

    #[tokio::test]
    async fn test_invalidate_refreshes_credential_with_secrets() {
        let auth = Arc::new(CountingAuthenticator {
            calls: AtomicUsize::new(0),
        });
        let mut s = settings();
        s.lease_timeout = Duration::from_secs(2);
        let pool = CredentialPool::new(
            s,
            &specs(&["me@x.io----pw----old-token"]),
            Some(auth.clone()),
            Metrics::new().unwrap(),
        );

        pool.lease(RequestId::new()).await.unwrap().invalidate();

        // The waiter is woken once sign-in swaps in the new token
        let lease = pool.lease(RequestId::new()).await.unwrap();
        assert_eq!(lease.credential().token(), "me@x.io-token-1");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_signs_in_credentials_without_token() {
        let auth = Arc::new(CountingAuthenticator {
            calls: AtomicUsize::new(0),
        });
        let mut s = settings();
        s.lease_timeout = Duration::from_secs(2);
        let pool = CredentialPool::new(
            s,
            &specs(&["me@x.io----pw"]),
            Some(auth),
            Metrics::new().unwrap(),
        );
        assert_eq!(pool.status(CredentialId::new(0)), Some(CredentialStatus::Expired));

        pool.start();
        let lease = pool.lease(RequestId::new()).await.unwrap();
        assert_eq!(lease.credential().token(), "me@x.io-token-1");
    }

    #[tokio::test]
    async fn test_token_ttl_expires_credentials_at_lease_time() {
        let mut s = settings();
        s.token_ttl = Some(Duration::from_millis(5));
        let pool = pool(&["tok-a"], s);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            pool.lease(RequestId::new()).await,
            Err(AppError::NoCredentialAvailable)
        ));
        assert_eq!(pool.status(CredentialId::new(0)), Some(CredentialStatus::Revoked));
    }

    #[tokio::test]
    async fn test_stale_release_does_not_count_against_new_token() {
        let auth = Arc::new(CountingAuthenticator {
            calls: AtomicUsize::new(0),
        });
        let mut s = settings();
        s.max_concurrent_per_credential = 2;
        s.lease_timeout = Duration::from_secs(2);
        let pool = CredentialPool::new(
            s,
            &specs(&["me@x.io----pw----old-token"]),
            Some(auth),
            Metrics::new().unwrap(),
        );

        let stale = pool.lease(RequestId::new()).await.unwrap();
        pool.lease(RequestId::new()).await.unwrap().invalidate();
        let fresh = pool.lease(RequestId::new()).await.unwrap();
        assert_eq!(fresh.credential().token(), "me@x.io-token-1");

        stale.fail();
        assert_eq!(pool.snapshot()[0].failure_count, 0);
    }
}
