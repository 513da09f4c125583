//! Driving a [`Relay`] from a live upstream session
//!
//! Streaming responses run a pump task that reads the upstream and writes
//! OpenAI chunks into a bounded channel. The channel is the backpressure
//! point: when the client reads slowly the pump stops reading upstream. When
//! the client goes away the receiver is dropped, the pump notices through
//! `Sender::closed`, drops the upstream response and the lease is released
//! as cancelled.

use super::Relay;
use crate::error::{AppError, AppResult};
use crate::handlers::openai::types::{ChatCompletion, ChatCompletionChunk};
use crate::metrics::{Metrics, ResponseMode};
use crate::upstream::UpstreamSession;
use futures::StreamExt;
use tokio::sync::mpsc;

/// What the pump hands to the response writer
#[derive(Debug)]
pub enum RelayFrame {
    Chunk(ChatCompletionChunk),
    /// End of the event stream; the writer emits `[DONE]`
    Done,
    /// Failure before any chunk was produced
    Error(AppError),
}

/// Spawn the pump for a streaming response
///
/// The first frame is either a chunk (output has begun), or an error. After
/// output has begun failures are logged and counted, and the stream is ended
/// with [`RelayFrame::Done`] without a terminal chunk. A client that goes
/// away before the end counts as an unsuccessful streaming request.
pub fn spawn_pump(
    mut relay: Relay,
    session: UpstreamSession,
    capacity: usize,
    metrics: Metrics,
) -> mpsc::Receiver<RelayFrame> {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        let UpstreamSession {
            mut stream,
            lease,
        } = session;
        let request_id = lease.request_id();

        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => {
                    tracing::info!(
                        request_id = %request_id,
                        completion_id = %relay.completion_id(),
                        "Client disconnected, abandoning upstream stream"
                    );
                    metrics.record_request(ResponseMode::Streaming, false);
                    return;
                }
                next = stream.next() => next,
            };

            let result = match next {
                Some(Ok(chunk)) => relay.push(chunk),
                Some(Err(err)) => Err(relay.fail(err)),
                None => relay.finish_eof(),
            };

            match result {
                Ok(chunks) => {
                    for chunk in chunks {
                        if tx.send(RelayFrame::Chunk(chunk)).await.is_err() {
                            tracing::info!(
                                request_id = %request_id,
                                "Client disconnected mid-stream"
                            );
                            metrics.record_request(ResponseMode::Streaming, false);
                            return;
                        }
                    }
                }
                Err(err) => {
                    lease.fail();
                    if relay.has_output() {
                        tracing::error!(
                            request_id = %request_id,
                            completion_id = %relay.completion_id(),
                            error = %err,
                            "Upstream failed after output began; ending stream without finish"
                        );
                        metrics.mid_stream_failure();
                        metrics.record_request(ResponseMode::Streaming, false);
                        let _ = tx.send(RelayFrame::Done).await;
                    } else {
                        let _ = tx.send(RelayFrame::Error(err)).await;
                    }
                    return;
                }
            }

            if relay.is_done() {
                lease.succeed();
                metrics.record_request(ResponseMode::Streaming, true);
                tracing::info!(
                    request_id = %request_id,
                    completion_id = %relay.completion_id(),
                    usage_total_tokens = relay.usage().total_tokens(),
                    "Streaming response completed"
                );
                let _ = tx.send(RelayFrame::Done).await;
                return;
            }
        }
    });

    rx
}

/// Read the whole upstream response into one completion
///
/// # Errors
/// Any upstream failure fails the whole request.
pub async fn buffer(mut relay: Relay, session: UpstreamSession) -> AppResult<ChatCompletion> {
    let UpstreamSession { mut stream, lease } = session;

    while let Some(item) = stream.next().await {
        let result = match item {
            Ok(chunk) => relay.push(chunk),
            Err(err) => Err(relay.fail(err)),
        };
        if let Err(err) = result {
            lease.fail();
            return Err(err);
        }
    }

    if let Err(err) = relay.finish_eof() {
        lease.fail();
        return Err(err);
    }

    lease.succeed();
    Ok(relay.into_completion())
}
