//! HTTP client for the upstream provider
//!
//! [`UpstreamClient::send`] performs one logical upstream call: it retries
//! network failures and 5xx with exponential backoff and returns the decoded
//! event stream once the upstream answered 2xx. [`UpstreamClient::open`] adds
//! the credential lifecycle on top: lease, send, and on 401/403 invalidate
//! the credential and try once more with a freshly leased one.
//!
//! A single deadline covers every attempt, the backoff sleeps and the whole
//! streamed body.

use super::protocol::{EventDecoder, StreamChunk, UpstreamProtocol};
use super::retry::RetryPolicy;
use crate::config::UpstreamConfig;
use crate::error::{AppError, AppResult, UpstreamError};
use crate::metrics::{Metrics, UpstreamOutcome};
use crate::middleware::RequestId;
use crate::pool::{Credential, CredentialPool, Lease};
use crate::translator::UpstreamRequest;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;

/// Upstream error bodies are truncated to this many characters in logs
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Decoded upstream output, in upstream order
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, UpstreamError>> + Send>>;

type EventStream =
    Pin<Box<dyn Stream<Item = Result<Event, EventStreamError<reqwest::Error>>> + Send>>;

/// A live upstream response and the credential lease it was made with
///
/// The lease must outlive the stream; whoever consumes the stream reports
/// the outcome through it.
pub struct UpstreamSession {
    pub stream: ChunkStream,
    pub lease: Lease,
}

impl std::fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSession")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

pub struct UpstreamClient {
    http: reqwest::Client,
    protocol: Arc<dyn UpstreamProtocol>,
    url: String,
    settings: UpstreamConfig,
    retry: RetryPolicy,
    metrics: Metrics,
}

impl UpstreamClient {
    /// Build the HTTP client from upstream settings
    ///
    /// # Errors
    /// Returns `AppError::Config` when the retry settings are invalid or the
    /// TLS backend cannot be initialized.
    pub fn new(
        settings: &UpstreamConfig,
        protocol: Arc<dyn UpstreamProtocol>,
        metrics: Metrics,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .pool_max_idle_per_host(settings.max_idle_connections)
            .pool_idle_timeout(std::time::Duration::from_secs(settings.keepalive_seconds))
            .tcp_keepalive(std::time::Duration::from_secs(settings.keepalive_seconds))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build upstream HTTP client: {}", e)))?;
        let retry = RetryPolicy::from_config(settings).map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            http,
            url: protocol.completions_url(settings.base_url()),
            protocol,
            settings: settings.clone(),
            retry,
            metrics,
        })
    }

    /// Underlying HTTP client, shared with the sign-in authenticator
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn protocol(&self) -> &Arc<dyn UpstreamProtocol> {
        &self.protocol
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deadline for a request starting now
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.settings.request_timeout()
    }

    /// Send one request, retrying transient failures
    ///
    /// # Errors
    /// Returns the last [`UpstreamError`] once retries are exhausted, the
    /// first non-retryable one, or `Timeout` when the deadline passes.
    pub async fn send(
        &self,
        request: &UpstreamRequest,
        request_id: RequestId,
        deadline: Instant,
    ) -> Result<ChunkStream, UpstreamError> {
        let max_retries = self.retry.max_retries();

        for attempt in 1..=max_retries {
            let started = std::time::Instant::now();
            tracing::debug!(
                request_id = %request_id,
                credential_id = %request.credential_id,
                model = %request.model,
                attempt = attempt,
                max_retries = max_retries,
                "Sending upstream request"
            );

            match self.attempt(request, deadline).await {
                Ok(response) => {
                    self.metrics.record_upstream_attempt(UpstreamOutcome::Success);
                    self.metrics
                        .observe_first_byte(started.elapsed().as_secs_f64() * 1000.0);
                    tracing::debug!(
                        request_id = %request_id,
                        credential_id = %request.credential_id,
                        attempt = attempt,
                        status = response.status().as_u16(),
                        "Upstream accepted request"
                    );
                    return Ok(self.chunk_stream(response, request_id, deadline));
                }
                Err(err) => {
                    self.metrics.record_upstream_attempt(classify(&err));

                    if err.is_retryable() && attempt < max_retries {
                        let backoff = self.retry.backoff(attempt);
                        if Instant::now() + backoff >= deadline {
                            tracing::warn!(
                                request_id = %request_id,
                                attempt = attempt,
                                error = %err,
                                "No time left for another upstream attempt"
                            );
                            return Err(self.timeout_error());
                        }
                        tracing::warn!(
                            request_id = %request_id,
                            credential_id = %request.credential_id,
                            attempt = attempt,
                            max_retries = max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "Upstream attempt failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    tracing::error!(
                        request_id = %request_id,
                        credential_id = %request.credential_id,
                        attempt = attempt,
                        max_retries = max_retries,
                        error = %err,
                        "Upstream request failed"
                    );
                    return Err(err);
                }
            }
        }

        // The loop always returns; max_retries is validated to be at least 1
        Err(UpstreamError::Network("no upstream attempt was made".to_string()))
    }

    /// Lease a credential and open an upstream stream with it
    ///
    /// `bind` turns the leased credential into the wire request. When the
    /// upstream rejects the credential (401/403) it is invalidated and the
    /// request is re-bound to a freshly leased credential once. A client
    /// error (other 4xx) releases the credential as healthy.
    ///
    /// # Errors
    /// `NoCredentialAvailable` when no lease can be obtained, otherwise the
    /// upstream failure.
    pub async fn open<F>(
        &self,
        pool: &Arc<CredentialPool>,
        request_id: RequestId,
        deadline: Instant,
        bind: F,
    ) -> AppResult<UpstreamSession>
    where
        F: Fn(&Credential) -> UpstreamRequest,
    {
        let mut reauthenticated = false;

        loop {
            let lease = pool.lease(request_id).await?;
            let request = bind(lease.credential());

            match self.send(&request, request_id, deadline).await {
                Ok(stream) => return Ok(UpstreamSession { stream, lease }),
                Err(err) if err.is_unauthorized() => {
                    tracing::warn!(
                        request_id = %request_id,
                        credential_id = %lease.id(),
                        error = %err,
                        retrying = !reauthenticated,
                        "Upstream rejected credential"
                    );
                    lease.invalidate();
                    if reauthenticated {
                        return Err(err.into());
                    }
                    reauthenticated = true;
                }
                Err(err) if err.is_client_error() => {
                    lease.succeed();
                    return Err(err.into());
                }
                Err(err) => {
                    lease.fail();
                    return Err(err.into());
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &UpstreamRequest,
        deadline: Instant,
    ) -> Result<reqwest::Response, UpstreamError> {
        let builder = self
            .protocol
            .apply_headers(self.http.post(&self.url), &request.token, &self.settings)
            .json(&request.body);

        let response = tokio::time::timeout_at(deadline, builder.send())
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| {
                if e.is_timeout() {
                    self.timeout_error()
                } else {
                    UpstreamError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = tokio::time::timeout_at(deadline, response.text())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        Err(UpstreamError::Status {
            status: status.as_u16(),
            body: truncate(&body, MAX_ERROR_BODY_CHARS),
        })
    }

    fn timeout_error(&self) -> UpstreamError {
        UpstreamError::Timeout {
            timeout_seconds: self.settings.request_timeout_seconds,
        }
    }

    fn chunk_stream(
        &self,
        response: reqwest::Response,
        request_id: RequestId,
        deadline: Instant,
    ) -> ChunkStream {
        let state = ChunkState {
            events: Box::pin(response.bytes_stream().eventsource()),
            decoder: self.protocol.decoder(),
            pending: VecDeque::new(),
            deadline,
            timeout_seconds: self.settings.request_timeout_seconds,
            request_id,
            finished: false,
        };
        Box::pin(futures::stream::unfold(state, ChunkState::next))
    }
}

struct ChunkState {
    events: EventStream,
    decoder: Box<dyn EventDecoder>,
    pending: VecDeque<StreamChunk>,
    deadline: Instant,
    timeout_seconds: u64,
    request_id: RequestId,
    finished: bool,
}

impl ChunkState {
    async fn next(mut self) -> Option<(Result<StreamChunk, UpstreamError>, Self)> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some((Ok(chunk), self));
            }
            if self.finished {
                return None;
            }

            let event = match tokio::time::timeout_at(self.deadline, self.events.next()).await {
                Err(_) => {
                    self.finished = true;
                    let err = UpstreamError::Timeout {
                        timeout_seconds: self.timeout_seconds,
                    };
                    return Some((Err(err), self));
                }
                Ok(None) => return None,
                Ok(Some(Err(e))) => {
                    self.finished = true;
                    let err = UpstreamError::StreamInterrupted {
                        reason: e.to_string(),
                    };
                    return Some((Err(err), self));
                }
                Ok(Some(Ok(event))) => event,
            };

            let data = event.data.trim();
            if data == "[DONE]" {
                self.finished = true;
                continue;
            }
            if data.is_empty() {
                continue;
            }

            match self.decoder.decode(data) {
                Ok(chunks) => self.pending.extend(chunks),
                Err(e) => {
                    tracing::warn!(
                        request_id = %self.request_id,
                        error = %e,
                        "Skipping undecodable upstream event"
                    );
                }
            }
        }
    }
}

fn classify(err: &UpstreamError) -> UpstreamOutcome {
    match err {
        UpstreamError::Timeout { .. } => UpstreamOutcome::Timeout,
        e if e.is_unauthorized() => UpstreamOutcome::Unauthorized,
        e if e.is_client_error() => UpstreamOutcome::ClientError,
        _ => UpstreamOutcome::Retryable,
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
