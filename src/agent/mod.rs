//! Agent Intelligence Layer — the core reasoning loop and related utilities.
//!
//! # Key types
//! - [`AgentLoop`] — drives the tool-call iteration cycle
//! - [`AgentConfig`] — parameters for the loop (model, max iterations, etc.)
//! - [`AgentMessage`] — a message in the agent's conversation history
//! - [`ParsedToolCall`] — a tool invocation extracted from an LLM response

pub mod context_source;
pub mod errors;
pub mod failover;
pub mod loop_;
pub mod session_router;
pub mod skills;
pub mod tool_parser;
pub mod turns;

pub use context_source::TurnContextBuilder;
pub use errors::{AgentLoopError, FailureContext};
pub use failover::{FailoverController, TierCallOutcome};
pub use loop_::{AgentConfig, AgentLoop, AgentTurnOutcome};
pub use session_router::{Session, SessionKey, SessionMessage, SessionRouter};
pub use tool_parser::ParsedToolCall;
pub use turns::ConversationTurn;
