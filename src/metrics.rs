//! Prometheus metrics collection for zrelay
//!
//! This module provides metrics instrumentation for tracking:
//! - Chat requests by response mode and outcome
//! - Credential pool transitions (leases, releases, refreshes, alerts)
//! - Upstream attempts and time to first byte
//! - Mid-stream relay failures
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! All label values come from closed enums so cardinality stays bounded.

use crate::pool::ReleaseOutcome;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// How a chat completion was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Streaming,
    Buffered,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Streaming => "streaming",
            ResponseMode::Buffered => "buffered",
        }
    }
}

/// Result of asking the pool for a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseResult {
    Granted,
    /// Waited the full lease timeout without a credential freeing up
    TimedOut,
    /// Nothing could ever become available (empty or fully revoked pool)
    Unavailable,
}

impl LeaseResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseResult::Granted => "granted",
            LeaseResult::TimedOut => "timed_out",
            LeaseResult::Unavailable => "unavailable",
        }
    }
}

/// Result of a sign-in refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshResult {
    Success,
    Failure,
}

impl RefreshResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshResult::Success => "success",
            RefreshResult::Failure => "failure",
        }
    }
}

/// Operator-visible credential alert conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    /// Credential removed from rotation for good (no secrets to refresh with)
    Revoked,
    /// Sign-in with the configured secrets failed
    RefreshFailed,
}

impl AlertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertReason::Revoked => "revoked",
            AlertReason::RefreshFailed => "refresh_failed",
        }
    }
}

/// Classification of one upstream HTTP attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    Success,
    /// Network error or 5xx; eligible for retry
    Retryable,
    ClientError,
    Unauthorized,
    Timeout,
}

impl UpstreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamOutcome::Success => "success",
            UpstreamOutcome::Retryable => "retryable",
            UpstreamOutcome::ClientError => "client_error",
            UpstreamOutcome::Unauthorized => "unauthorized",
            UpstreamOutcome::Timeout => "timeout",
        }
    }
}

/// Metrics collector for zrelay
///
/// Cheap to clone: every collector is reference counted internally, so the
/// pool, upstream client and handlers can each hold their own copy.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    credential_leases: IntCounterVec,
    credential_releases: IntCounterVec,
    credential_refreshes: IntCounterVec,
    credential_alerts: IntCounterVec,
    active_leases: IntGauge,
    upstream_attempts: IntCounterVec,
    upstream_first_byte: Histogram,
    mid_stream_failures: IntCounter,
    background_task_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 2 modes x 2 outcomes
        let requests_total = IntCounterVec::new(
            Opts::new(
                "zrelay_requests_total",
                "Total chat completion requests by response mode and outcome",
            ),
            &["mode", "outcome"],
        )?;

        let credential_leases = IntCounterVec::new(
            Opts::new(
                "zrelay_credential_leases_total",
                "Credential lease attempts by result (granted, timed_out, unavailable)",
            ),
            &["result"],
        )?;

        let credential_releases = IntCounterVec::new(
            Opts::new(
                "zrelay_credential_releases_total",
                "Credential releases by outcome (success, failure, unauthorized, cancelled)",
            ),
            &["outcome"],
        )?;

        let credential_refreshes = IntCounterVec::new(
            Opts::new(
                "zrelay_credential_refreshes_total",
                "Sign-in token refreshes by result",
            ),
            &["result"],
        )?;

        // Alert on ANY increment: a credential left rotation or cannot be renewed
        let credential_alerts = IntCounterVec::new(
            Opts::new(
                "zrelay_credential_alerts_total",
                "Credentials removed from rotation or failing to refresh. \
                Alert on ANY increment - the pool is shrinking.",
            ),
            &["reason"],
        )?;

        let active_leases = IntGauge::with_opts(Opts::new(
            "zrelay_active_leases",
            "Credential leases currently held by in-flight requests",
        ))?;

        let upstream_attempts = IntCounterVec::new(
            Opts::new(
                "zrelay_upstream_attempts_total",
                "Upstream HTTP attempts by outcome",
            ),
            &["outcome"],
        )?;

        let upstream_first_byte = Histogram::with_opts(
            HistogramOpts::new(
                "zrelay_upstream_first_byte_ms",
                "Time until upstream response headers arrive, in milliseconds",
            )
            .buckets(vec![
                50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            ]),
        )?;

        // Mid-stream failures happen after HTTP 200 was sent, so the client only
        // sees a truncated stream. This counter is the operator's view of them.
        let mid_stream_failures = IntCounter::with_opts(Opts::new(
            "zrelay_mid_stream_failures_total",
            "Upstream failures after streaming output started (client saw a truncated stream)",
        ))?;

        let background_task_failures = IntCounterVec::new(
            Opts::new(
                "zrelay_background_task_failures_total",
                "Background task failures by task (auto_refresh, credential_refresh)",
            ),
            &["task"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(credential_leases.clone()))?;
        registry.register(Box::new(credential_releases.clone()))?;
        registry.register(Box::new(credential_refreshes.clone()))?;
        registry.register(Box::new(credential_alerts.clone()))?;
        registry.register(Box::new(active_leases.clone()))?;
        registry.register(Box::new(upstream_attempts.clone()))?;
        registry.register(Box::new(upstream_first_byte.clone()))?;
        registry.register(Box::new(mid_stream_failures.clone()))?;
        registry.register(Box::new(background_task_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            credential_leases,
            credential_releases,
            credential_refreshes,
            credential_alerts,
            active_leases,
            upstream_attempts,
            upstream_first_byte,
            mid_stream_failures,
            background_task_failures,
        })
    }

    /// Record a finished chat request
    pub fn record_request(&self, mode: ResponseMode, success: bool) {
        let outcome = if success { "success" } else { "error" };
        self.requests_total
            .with_label_values(&[mode.as_str(), outcome])
            .inc();
    }

    pub fn record_lease(&self, result: LeaseResult) {
        self.credential_leases
            .with_label_values(&[result.as_str()])
            .inc();
        if result == LeaseResult::Granted {
            self.active_leases.inc();
        }
    }

    pub fn record_release(&self, outcome: ReleaseOutcome) {
        self.credential_releases
            .with_label_values(&[outcome.as_str()])
            .inc();
        self.active_leases.dec();
    }

    pub fn record_refresh(&self, result: RefreshResult) {
        self.credential_refreshes
            .with_label_values(&[result.as_str()])
            .inc();
    }

    pub fn credential_alert(&self, reason: AlertReason) {
        self.credential_alerts
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn record_upstream_attempt(&self, outcome: UpstreamOutcome) {
        self.upstream_attempts
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn observe_first_byte(&self, duration_ms: f64) {
        self.upstream_first_byte.observe(duration_ms);
    }

    pub fn mid_stream_failure(&self) {
        self.mid_stream_failures.inc();
    }

    pub fn background_task_failure(&self, task: &'static str) {
        self.background_task_failures
            .with_label_values(&[task])
            .inc();
    }

    pub fn request_count(&self, mode: ResponseMode, success: bool) -> u64 {
        let outcome = if success { "success" } else { "error" };
        self.requests_total
            .with_label_values(&[mode.as_str(), outcome])
            .get()
    }

    pub fn lease_count(&self, result: LeaseResult) -> u64 {
        self.credential_leases
            .with_label_values(&[result.as_str()])
            .get()
    }

    pub fn release_count(&self, outcome: ReleaseOutcome) -> u64 {
        self.credential_releases
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn refresh_count(&self, result: RefreshResult) -> u64 {
        self.credential_refreshes
            .with_label_values(&[result.as_str()])
            .get()
    }

    pub fn alert_count(&self, reason: AlertReason) -> u64 {
        self.credential_alerts
            .with_label_values(&[reason.as_str()])
            .get()
    }

    pub fn upstream_attempt_count(&self, outcome: UpstreamOutcome) -> u64 {
        self.upstream_attempts
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn active_leases(&self) -> i64 {
        self.active_leases.get()
    }

    pub fn mid_stream_failures_count(&self) -> u64 {
        self.mid_stream_failures.get()
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            tracing::error!(
                invalid_byte_index = e.utf8_error().valid_up_to(),
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
        })
    }
}
