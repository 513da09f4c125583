//! Server-sent event rendering for streamed completions
//!
//! Each chunk is one event:
//! ```text
//! data: {"id":"chatcmpl-...","object":"chat.completion.chunk",...}
//!
//! ```
//!
//! The stream ends with:
//! ```text
//! data: [DONE]
//!
//! ```
//!
//! Keep-alive comments are sent while the upstream is quiet.

use crate::handlers::openai::types::ChatCompletionChunk;
use crate::middleware::RequestId;
use crate::relay::RelayFrame;
use axum::response::{
    IntoResponse, Response,
    sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DONE: &str = "[DONE]";

/// Build the SSE response from the first chunk and the pump's receiver
pub fn sse_response(
    first: ChatCompletionChunk,
    rx: mpsc::Receiver<RelayFrame>,
    keepalive: Duration,
    request_id: RequestId,
) -> Response {
    let head = stream::once(async move { Ok::<_, Infallible>(chunk_event(&first, request_id)) });
    let rest = ReceiverStream::new(rx).map(move |frame| {
        let event = match frame {
            RelayFrame::Chunk(chunk) => chunk_event(&chunk, request_id),
            RelayFrame::Done => Event::default().data(DONE),
            RelayFrame::Error(err) => {
                tracing::error!(
                    request_id = %request_id,
                    error = %err,
                    "Relay failed after the response was committed"
                );
                Event::default().data(DONE)
            }
        };
        Ok(event)
    });

    Sse::new(head.chain(rest))
        .keep_alive(KeepAlive::new().interval(keepalive))
        .into_response()
}

fn chunk_event(chunk: &ChatCompletionChunk, request_id: RequestId) -> Event {
    match serde_json::to_string(chunk) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                "Failed to serialize completion chunk"
            );
            Event::default().comment("serialization error")
        }
    }
}
