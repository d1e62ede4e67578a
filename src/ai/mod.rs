//! The LLM-facing half of the crate: wire types, the provider seam, concrete
//! provider adapters, and the context pipeline that feeds them.

pub mod context;
pub mod provider;
pub mod providers;
pub mod sanitize;
pub mod types;

pub use context::{BudgetReport, Section, SectionContent};
pub use provider::{LLMProvider, ProviderError};
pub use providers::{build_provider_set, OpenAICompatibleConfig, OpenAICompatibleProvider};
pub use sanitize::{scrub_control_strings, scrub_pii, scrub_request};
pub use types::{
    CompletionRequest, CompletionResponse, Message, MessageRole, StreamChunk, ToolCallDelta,
    ToolSchema, TokenUsage,
};
