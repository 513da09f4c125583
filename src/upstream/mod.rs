//! Upstream chat provider access
//!
//! [`protocol`] defines the per-provider wire codec, [`zai`] and [`openai`]
//! implement it, and [`client`] drives HTTP with retries, deadlines and
//! credential re-authentication.

pub mod client;
pub mod openai;
pub mod protocol;
pub mod retry;
pub mod zai;

pub use client::{ChunkStream, UpstreamClient, UpstreamSession};
pub use protocol::{
    Capabilities, EventDecoder, StreamChunk, ToolCallFragment, UpstreamProtocol, protocol_for,
};
pub use retry::RetryPolicy;
