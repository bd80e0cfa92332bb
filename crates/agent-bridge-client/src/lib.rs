//! Client for remote memory-agent servers.
//!
//! Provides:
//! - `HttpAgentClient` - `AgentApi` over the server's REST + SSE endpoints
//! - Retry with exponential backoff and jitter
//! - `StreamTranslator` - SSE frames to `StreamEvent`s

pub mod client;
pub mod protocol;
pub mod retry;
pub mod translator;

pub use client::HttpAgentClient;
pub use retry::{RetryPolicy, with_retry};
pub use translator::{FrameDecoder, StreamTranslator, translate_stream};
