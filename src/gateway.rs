//! Per-request orchestration
//!
//! A [`Runtime`] bundles everything built from one configuration snapshot:
//! the credential pool, translator and upstream client. Hot reload swaps the
//! whole runtime; requests already running keep the one they started with.
//!
//! [`Runtime::complete`] runs one chat completion end to end: prepare the
//! prompt, lease a credential and open the upstream stream, then either pump
//! it to the client or buffer it into a single completion. The credential
//! lease travels with the upstream stream, so it is released exactly once
//! whichever way the request ends.

use crate::config::Config;
use crate::error::{AppError, AppResult, UpstreamError};
use crate::handlers::openai::types::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, current_timestamp,
};
use crate::metrics::{Metrics, ResponseMode};
use crate::middleware::RequestId;
use crate::pool::{CredentialId, CredentialPool, PoolSettings};
use crate::relay::{self, CharRatioCounter, Relay, RelayFrame, RelayOptions, TokenCounter};
use crate::translator::Translator;
use crate::upstream::{UpstreamClient, protocol_for};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Prompt sent when checking whether a credential still works
const CHECK_PROMPT: &str = "ping";

/// How a completion is delivered
#[derive(Debug)]
pub enum GatewayResponse {
    Buffered(ChatCompletion),
    /// Output has begun: `first` is the role chunk, the rest arrives on `rx`
    Streaming {
        first: ChatCompletionChunk,
        rx: mpsc::Receiver<RelayFrame>,
    },
}

/// Result of sending a minimal completion with one credential
#[derive(Debug, Clone, Serialize)]
pub struct CredentialCheck {
    pub id: CredentialId,
    pub ok: bool,
    /// `ok`, `unauthorized`, `rejected`, `upstream_error`, `timeout`,
    /// `network` or `no_token`
    pub outcome: &'static str,
    /// Upstream HTTP status when the upstream answered with an error
    pub status: Option<u16>,
    pub latency_ms: u64,
}

pub struct Runtime {
    config: Arc<Config>,
    pool: Arc<CredentialPool>,
    translator: Translator,
    client: UpstreamClient,
    counter: Arc<dyn TokenCounter>,
    metrics: Metrics,
}

impl Runtime {
    /// Build a runtime from a validated configuration
    ///
    /// The pool's background work (initial sign-in, periodic refresh) starts
    /// only when [`Runtime::start`] is called.
    ///
    /// # Errors
    /// Returns `AppError::Config` when the upstream client cannot be built.
    pub fn build(config: Config, metrics: &Metrics) -> AppResult<Self> {
        let protocol = protocol_for(config.upstream.protocol);
        let client = UpstreamClient::new(&config.upstream, protocol.clone(), metrics.clone())?;
        let authenticator = protocol.authenticator(client.http().clone(), &config.upstream);
        let pool = CredentialPool::new(
            PoolSettings::from(&config.pool),
            &config.pool.credentials,
            authenticator,
            metrics.clone(),
        );
        let translator = Translator::new(&config, protocol);

        tracing::info!(
            protocol = client.protocol().name(),
            upstream_url = %client.url(),
            credentials = pool.len(),
            models = config.models.len(),
            "Runtime built"
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            translator,
            client,
            counter: Arc::new(CharRatioCounter),
            metrics: metrics.clone(),
        })
    }

    pub fn start(&self) {
        self.pool.start();
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    /// Run one chat completion
    ///
    /// Streaming responses are returned only once the relay has produced its
    /// first chunk; any failure before that is returned as an error.
    ///
    /// # Errors
    /// Translation, credential and upstream failures, mapped to `AppError`.
    pub async fn complete(
        &self,
        request: &ChatCompletionRequest,
        request_id: RequestId,
    ) -> AppResult<GatewayResponse> {
        let streaming = request
            .stream()
            .unwrap_or(self.config.relay.default_stream);
        let mode = if streaming {
            ResponseMode::Streaming
        } else {
            ResponseMode::Buffered
        };

        let result = self.run(request, request_id, streaming).await;
        // Streams that began are counted by the pump when they end
        match &result {
            Ok(GatewayResponse::Buffered(_)) => self.metrics.record_request(mode, true),
            Ok(GatewayResponse::Streaming { .. }) => {}
            Err(_) => self.metrics.record_request(mode, false),
        }
        result
    }

    async fn run(
        &self,
        request: &ChatCompletionRequest,
        request_id: RequestId,
        streaming: bool,
    ) -> AppResult<GatewayResponse> {
        let prompt = self.translator.prepare(request)?;
        let prompt_tokens = self.counter.count_chars(prompt.prompt_chars());

        tracing::debug!(
            request_id = %request_id,
            model = %request.model(),
            upstream_model = %prompt.model.upstream_id(),
            messages = prompt.messages.len(),
            streaming = streaming,
            "Prepared upstream prompt"
        );

        let deadline = self.client.deadline();
        let session = self
            .client
            .open(&self.pool, request_id, deadline, |credential| {
                self.translator.bind(&prompt, credential)
            })
            .await?;

        let relay = Relay::new(
            RelayOptions {
                completion_id: request_id.completion_id(),
                model: request.model().to_string(),
                created: current_timestamp(),
                show_think_tags: self.config.relay.show_think_tags,
                include_usage: streaming && request.include_usage(),
            },
            prompt_tokens,
            self.counter.clone(),
        );

        if !streaming {
            let completion = relay::buffer(relay, session).await?;
            tracing::info!(
                request_id = %request_id,
                completion_id = %completion.id,
                finish_reason = ?completion.choices.first().map(|c| c.finish_reason),
                total_tokens = completion.usage.total_tokens(),
                "Buffered response completed"
            );
            return Ok(GatewayResponse::Buffered(completion));
        }

        let mut rx = relay::spawn_pump(
            relay,
            session,
            self.config.relay.channel_capacity,
            self.metrics.clone(),
        );
        match rx.recv().await {
            Some(RelayFrame::Chunk(first)) => Ok(GatewayResponse::Streaming { first, rx }),
            Some(RelayFrame::Error(err)) => Err(err),
            Some(RelayFrame::Done) | None => Err(AppError::Internal(
                "relay ended before producing output".to_string(),
            )),
        }
    }
    /// Send a one-message completion with credential `id` and report whether
    /// the upstream accepted it
    ///
    /// The credential is used without a lease and its pool state is not
    /// touched; this is an operator check, not traffic.
    ///
    /// # Errors
    /// `CredentialNotFound` for an unknown id; `Internal` when the check
    /// request cannot be built.
    pub async fn check_credential(&self, id: CredentialId) -> AppResult<CredentialCheck> {
        let credential = self
            .pool
            .credential(id)
            .ok_or(AppError::CredentialNotFound(id))?;

        if credential.token().is_empty() {
            return Ok(CredentialCheck {
                id,
                ok: false,
                outcome: "no_token",
                status: None,
                latency_ms: 0,
            });
        }

        let model = self
            .config
            .models
            .first()
            .ok_or_else(|| AppError::Internal("no model configured for checks".to_string()))?;
        let request = ChatCompletionRequest::builder()
            .model(model.id())
            .user_message(CHECK_PROMPT)
            .max_tokens(1)
            .build()
            .map_err(AppError::Internal)?;
        let prompt = self.translator.prepare(&request)?;
        let upstream_request = self.translator.bind(&prompt, &credential);

        let request_id = RequestId::new();
        let started = Instant::now();
        let result = self
            .client
            .send(&upstream_request, request_id, self.client.deadline())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = match &result {
            Err(UpstreamError::Status { status, .. }) => Some(*status),
            _ => None,
        };
        let outcome = match &result {
            // Only the response head is needed; dropping the stream closes it
            Ok(_) => "ok",
            Err(err) if err.is_unauthorized() => "unauthorized",
            Err(err) if err.is_client_error() => "rejected",
            Err(UpstreamError::Timeout { .. }) => "timeout",
            Err(UpstreamError::Network(_)) => "network",
            Err(_) => "upstream_error",
        };

        tracing::info!(
            request_id = %request_id,
            credential_id = %id,
            outcome = outcome,
            status = ?status,
            latency_ms = latency_ms,
            "Credential check finished"
        );

        Ok(CredentialCheck {
            id,
            ok: result.is_ok(),
            outcome,
            status,
            latency_ms,
        })
    }
}
