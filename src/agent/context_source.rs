//! Seam between a non-interactive ingress (cron, inbox) and the context
//! pipeline (spec.md §4.3): [`SectionContent`] is "caller-produced" by
//! design (`ai::context`'s own doc comment), so anything that drives
//! [`crate::agent::AgentLoop::run`] without a live chat-panel request still
//! needs a way to obtain a current snapshot.
//!
//! One implementation lives wherever the embedding host's `GraphAPI` pulls
//! are wired up; this crate only pins down the seam.

use async_trait::async_trait;

use crate::ai::context::SectionContent;
use crate::ai::types::ToolSchema;

/// Builds the inputs an [`crate::agent::AgentLoop::run`] call needs beyond
/// the user message itself, for callers that are not the live chat panel
/// (spec.md §4.6 cron ticks, §4.7 inbox items).
#[async_trait]
pub trait TurnContextBuilder: Send + Sync {
    /// Renders current section content for one turn's system prompt.
    async fn build(&self, user_message: &str) -> SectionContent;

    /// The tool schemas currently registered (spec.md §4.4), offered to the
    /// model for this turn.
    fn tool_schemas(&self) -> Vec<ToolSchema>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBuilder;

    #[async_trait]
    impl TurnContextBuilder for StubBuilder {
        async fn build(&self, _user_message: &str) -> SectionContent {
            SectionContent {
                core: "You are a helpful agent.".to_string(),
                ..Default::default()
            }
        }
        fn tool_schemas(&self) -> Vec<ToolSchema> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn stub_builder_produces_core_section() {
        let builder = StubBuilder;
        let content = builder.build("hi").await;
        assert!(content.core.contains("helpful"));
        assert!(builder.tool_schemas().is_empty());
    }
}
