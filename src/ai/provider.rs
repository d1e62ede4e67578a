//! The `LLMProvider` seam (spec.md §6).
//!
//! One implementation per concrete wire protocol lives under
//! `ai::providers::*`; the agent loop and failover controller only ever see
//! this trait, never a provider-specific request/response shape.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{CompletionRequest, CompletionResponse, StreamChunk};

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Error taxonomy a provider adapter must classify into (spec.md §7
/// "Retryable transport" / "Hard LLM error"). The failover controller
/// (`agent::failover`) matches on this enum rather than re-parsing message
/// strings, per spec.md §9's "isolate in per-provider adapter modules".
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// 429, connect/read timeout, network error, 5xx, "overloaded",
    /// "service_tier_capacity_exceeded". Eligible for same-tier failover.
    #[error("retryable transport error: {0}")]
    RetryableTransport(String),
    /// 400/401/403, content-policy rejection. Never retried.
    #[error("request failed: {0}")]
    HardFailure(String),
    /// The provider has no API key configured / is not enabled.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Whether this error is eligible for provider failover (spec.md §4.2 step 2).
    pub fn is_failover_eligible(&self) -> bool {
        matches!(self, ProviderError::RetryableTransport(_))
    }
}

pub type StreamResponse = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Callback invoked with each streamed text delta (spec.md §4.1 step 3).
pub type TextChunkCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Request/response completion.
    async fn call(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Streaming completion. Providers that cannot stream should fall back to
    /// a single `call()` and synthesize one final chunk.
    async fn call_streaming(
        &self,
        request: CompletionRequest,
        on_chunk: TextChunkCallback<'_>,
    ) -> Result<CompletionResponse> {
        let resp = self.call(request).await?;
        on_chunk(&resp.content);
        Ok(resp)
    }

    fn context_limit(&self) -> usize;
    fn supports_tools(&self) -> bool;
    fn provider_name(&self) -> &str;

    /// USD cost of `input`/`output` tokens for `model` under this provider's
    /// rate card. Used by the agent loop's cost accounting (spec.md §3 "Cost history").
    fn cost_usd(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_transport_is_failover_eligible() {
        assert!(ProviderError::RetryableTransport("503".into()).is_failover_eligible());
        assert!(!ProviderError::HardFailure("400".into()).is_failover_eligible());
        assert!(!ProviderError::Unavailable("no key".into()).is_failover_eligible());
    }
}
