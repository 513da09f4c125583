//! Token renewal by signing in with stored secrets

use super::{CredentialId, CredentialPool, SlotState};
use crate::metrics::{AlertReason, RefreshResult};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

use super::Secrets;

/// Sign-ins allowed to run at once during a full refresh
const MAX_CONCURRENT_REFRESHES: usize = 20;

/// Obtains a new upstream token from sign-in secrets
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_in(&self, secrets: &Secrets) -> Result<String, AuthError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Upstream protocol does not support sign-in")]
    NotSupported,

    #[error("Unknown credential {0}")]
    UnknownCredential(CredentialId),

    #[error("Credential {0} has no sign-in secrets")]
    NoSecrets(CredentialId),

    #[error("Sign-in request failed: {0}")]
    Http(String),

    #[error("Sign-in did not complete within {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("Sign-in rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("Sign-in response did not contain a token")]
    MissingToken,
}

/// Result of refreshing every credential that has secrets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
    /// Credentials without secrets, or already being refreshed
    pub skipped: usize,
}

impl CredentialPool {
    /// Sign in again for one credential and swap in the new token
    ///
    /// On success the credential returns to rotation with a clean failure
    /// count. On failure its state is left as it was; an expired credential
    /// stays out of rotation until a later refresh succeeds. A sign-in that
    /// outlives `sign_in_timeout` is abandoned and counts as a failure, so the
    /// credential is never left marked as refreshing.
    pub async fn refresh_credential(&self, id: CredentialId) -> Result<(), AuthError> {
        let Some(authenticator) = self.authenticator.clone() else {
            return Err(AuthError::NotSupported);
        };

        let secrets = {
            let mut inner = self.inner.lock();
            let slot = inner
                .slots
                .get_mut(id.index())
                .ok_or(AuthError::UnknownCredential(id))?;
            match slot.credential.secrets() {
                Some(secrets) => {
                    slot.refreshing = true;
                    secrets.clone()
                }
                None => return Err(AuthError::NoSecrets(id)),
            }
        };

        let limit = self.settings.sign_in_timeout;
        let result = tokio::time::timeout(limit, authenticator.sign_in(&secrets))
            .await
            .unwrap_or(Err(AuthError::TimedOut {
                seconds: limit.as_secs(),
            }));

        {
            let mut inner = self.inner.lock();
            if let Some(slot) = inner.slots.get_mut(id.index()) {
                slot.refreshing = false;
                if let Ok(token) = &result {
                    slot.credential.set_token(token.clone());
                    slot.generation += 1;
                    slot.state = SlotState::Available;
                    slot.failure_count = 0;
                    slot.issued_at = Instant::now();
                }
            }
        }
        self.notify.notify_waiters();

        match result {
            Ok(_) => {
                self.metrics.record_refresh(RefreshResult::Success);
                tracing::info!(credential_id = %id, "Credential token refreshed");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_refresh(RefreshResult::Failure);
                self.metrics.credential_alert(AlertReason::RefreshFailed);
                tracing::error!(
                    credential_id = %id,
                    error = %e,
                    "Credential sign-in failed, credential stays out of rotation until a refresh succeeds"
                );
                Err(e)
            }
        }
    }

    /// Refresh every credential with secrets, a bounded number at a time
    pub async fn refresh_all(&self) -> RefreshSummary {
        let (ids, skipped) = {
            let mut inner = self.inner.lock();
            let mut ids = Vec::new();
            let mut skipped = 0;
            for slot in inner.slots.iter_mut() {
                if slot.credential.secrets().is_some() && !slot.refreshing {
                    slot.refreshing = true;
                    ids.push(slot.credential.id());
                } else {
                    skipped += 1;
                }
            }
            (ids, skipped)
        };

        if self.authenticator.is_none() {
            self.clear_refreshing(&ids);
            return RefreshSummary {
                refreshed: 0,
                failed: 0,
                skipped: skipped + ids.len(),
            };
        }

        let results: Vec<_> = futures::stream::iter(ids)
            .map(|id| self.refresh_credential(id))
            .buffer_unordered(MAX_CONCURRENT_REFRESHES)
            .collect()
            .await;

        let refreshed = results.iter().filter(|r| r.is_ok()).count();
        RefreshSummary {
            refreshed,
            failed: results.len() - refreshed,
            skipped,
        }
    }

    fn clear_refreshing(&self, ids: &[CredentialId]) {
        let mut inner = self.inner.lock();
        for id in ids {
            if let Some(slot) = inner.slots.get_mut(id.index()) {
                slot.refreshing = false;
            }
        }
    }

    /// Refresh one credential in the background
    ///
    /// The task holds only a weak reference, so a pool replaced by a config
    /// reload is not kept alive by in-flight sign-ins.
    pub(super) fn spawn_refresh(self: &Arc<Self>, id: CredentialId) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(credential_id = %id, "No async runtime available to refresh credential");
            self.clear_refreshing(&[id]);
            return;
        };

        let weak = Arc::downgrade(self);
        handle.spawn(async move {
            if let Some(pool) = weak.upgrade() {
                // Failures are logged and counted inside refresh_credential
                let _ = pool.refresh_credential(id).await;
            }
        });
    }

    /// Periodically refresh every credential with secrets
    pub(super) fn spawn_auto_refresh(self: &Arc<Self>, interval: Duration) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!("No async runtime available, periodic credential refresh disabled");
            return;
        };

        let weak = Arc::downgrade(self);
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else {
                    tracing::debug!("Credential pool dropped, stopping periodic refresh");
                    break;
                };
                let summary = pool.refresh_all().await;
                tracing::info!(
                    refreshed = summary.refreshed,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Periodic credential refresh complete"
                );
            }
        });

        // Monitor the refresh task so a panic is visible to operators
        let metrics = self.metrics.clone();
        handle.spawn(async move {
            if let Err(e) = task.await
                && e.is_panic()
            {
                metrics.background_task_failure("auto_refresh");
                tracing::error!(error = %e, "Periodic credential refresh task panicked");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CredentialSpec, PoolSettings};
    use super::*;
    use crate::config::SelectionStrategy;
    use crate::metrics::Metrics;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RejectingAuthenticator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for RejectingAuthenticator {
        async fn sign_in(&self, _secrets: &Secrets) -> Result<String, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::Rejected { status: 401 })
        }
    }

    struct FixedAuthenticator;

    #[async_trait]
    impl Authenticator for FixedAuthenticator {
        async fn sign_in(&self, _secrets: &Secrets) -> Result<String, AuthError> {
            Ok("renewed-token".to_string())
        }
    }

    /// Sign-in that never completes, like a server that accepts and goes quiet
    struct HangingAuthenticator;

    #[async_trait]
    impl Authenticator for HangingAuthenticator {
        async fn sign_in(&self, _secrets: &Secrets) -> Result<String, AuthError> {
            std::future::pending().await
        }
    }

    fn settings() -> PoolSettings {
        PoolSettings {
            selection: SelectionStrategy::RoundRobin,
            max_concurrent_per_credential: 1,
            lease_timeout: Duration::from_millis(50),
            failure_threshold: 3,
            token_ttl: None,
            auto_refresh_interval: None,
            sign_in_timeout: Duration::from_secs(30),
        }
    }

    fn specs(raw: &[&str]) -> Vec<CredentialSpec> {
        raw.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_refresh_all_counts_results() {
        let pool = CredentialPool::new(
            settings(),
            &specs(&["a@x.io----pw----tok-a", "plain-token", "b@x.io----pw"]),
            Some(Arc::new(FixedAuthenticator)),
            Metrics::new().unwrap(),
        );

        let summary = pool.refresh_all().await;
        assert_eq!(
            summary,
            RefreshSummary {
                refreshed: 2,
                failed: 0,
                skipped: 1
            }
        );
        assert_eq!(pool.summary().fresh, 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_credential_expired() {
        let auth = Arc::new(RejectingAuthenticator {
            calls: AtomicUsize::new(0),
        });
        let metrics = Metrics::new().unwrap();
        let pool = CredentialPool::new(
            settings(),
            &specs(&["a@x.io----pw"]),
            Some(auth.clone()),
            metrics.clone(),
        );

        let err = pool.refresh_credential(CredentialId::new(0)).await.unwrap_err();
        assert_eq!(err, AuthError::Rejected { status: 401 });
        assert_eq!(pool.summary().expired, 1);
        assert!(!pool.snapshot()[0].refreshing);
        assert_eq!(metrics.refresh_count(RefreshResult::Failure), 1);
        assert_eq!(metrics.alert_count(AlertReason::RefreshFailed), 1);
    }

    #[tokio::test]
    async fn test_hanging_sign_in_times_out_and_clears_refreshing() {
        let mut s = settings();
        s.sign_in_timeout = Duration::from_millis(50);
        let metrics = Metrics::new().unwrap();
        let pool = CredentialPool::new(
            s,
            &specs(&["a@x.io----pw"]),
            Some(Arc::new(HangingAuthenticator)),
            metrics.clone(),
        );

        let err = pool.refresh_credential(CredentialId::new(0)).await.unwrap_err();
        assert!(matches!(err, AuthError::TimedOut { .. }));
        assert!(!pool.snapshot()[0].refreshing);
        assert_eq!(pool.summary().expired, 1);
        assert_eq!(metrics.refresh_count(RefreshResult::Failure), 1);

        // Not skipped as still refreshing
        let summary = pool.refresh_all().await;
        assert_eq!(
            summary,
            RefreshSummary {
                refreshed: 0,
                failed: 1,
                skipped: 0
            }
        );
        assert!(!pool.snapshot()[0].refreshing);
    }

    #[tokio::test]
    async fn test_refresh_without_secrets_is_rejected() {
        let pool = CredentialPool::new(
            settings(),
            &specs(&["plain-token"]),
            Some(Arc::new(FixedAuthenticator)),
            Metrics::new().unwrap(),
        );
        assert_eq!(
            pool.refresh_credential(CredentialId::new(0)).await,
            Err(AuthError::NoSecrets(CredentialId::new(0)))
        );
        assert_eq!(
            pool.refresh_credential(CredentialId::new(9)).await,
            Err(AuthError::UnknownCredential(CredentialId::new(9)))
        );
    }

    #[tokio::test]
    async fn test_refresh_without_authenticator_skips_everything() {
        let pool = CredentialPool::new(
            settings(),
            &specs(&["a@x.io----pw----tok-a"]),
            None,
            Metrics::new().unwrap(),
        );
        let summary = pool.refresh_all().await;
        assert_eq!(summary.skipped, 1);
        assert!(!pool.snapshot()[0].refreshing);
    }

    #[tokio::test]
    async fn test_auto_refresh_runs_on_interval() {
        let mut s = settings();
        s.auto_refresh_interval = Some(Duration::from_millis(20));
        let pool = CredentialPool::new(
            s,
            &specs(&["a@x.io----pw----tok-a"]),
            Some(Arc::new(FixedAuthenticator)),
            Metrics::new().unwrap(),
        );
        pool.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(pool.snapshot()[0].token_hint, "renewe***");
    }
}
