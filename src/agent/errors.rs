//! `AgentLoopError` — the cross-provider / cross-tool error taxonomy
//! (spec.md §7, §10.1), classified once at the point of creation so the
//! failover controller (`agent::failover`) never re-parses message strings
//! to decide retryability.

use std::time::Duration;

use crate::ai::provider::ProviderError;
use crate::ai::types::Message;

/// Context attached to every thrown `AgentLoopError` (spec.md §4.1 "Failure
/// semantics") so the failover controller can decide whether, and how, to
/// carry progress across a provider/tier boundary.
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    /// Last 6 messages, capped at 20 KB total (spec.md §4.1 step "Failure semantics").
    pub accumulated_messages: Vec<Message>,
    pub iteration: usize,
    pub provider: String,
    pub tier: String,
    /// `iterations > 1` — whether there is any progress worth carrying over.
    pub can_carry_over: bool,
    /// Fingerprints of tool calls that wrote successfully before the error,
    /// used to build `carryoverWriteReplayGuard` on the next attempt.
    pub successful_write_fingerprints: Vec<String>,
}

impl FailureContext {
    const MAX_ACCUMULATED_BYTES: usize = 20_000;

    pub fn new(messages: &[Message], iteration: usize, provider: &str, tier: &str) -> Self {
        let tail: Vec<Message> = messages.iter().rev().take(6).rev().cloned().collect();
        let capped = cap_messages_to_bytes(tail, Self::MAX_ACCUMULATED_BYTES);
        Self {
            accumulated_messages: capped,
            iteration,
            provider: provider.to_string(),
            tier: tier.to_string(),
            can_carry_over: iteration > 1,
            successful_write_fingerprints: Vec::new(),
        }
    }

    pub fn with_write_fingerprints(mut self, fingerprints: Vec<String>) -> Self {
        self.successful_write_fingerprints = fingerprints;
        self
    }
}

fn cap_messages_to_bytes(messages: Vec<Message>, max_bytes: usize) -> Vec<Message> {
    let mut total = 0usize;
    let mut kept = Vec::new();
    // Keep the most recent messages first, then restore chronological order.
    for msg in messages.into_iter().rev() {
        let len = msg.char_len();
        if total + len > max_bytes && !kept.is_empty() {
            break;
        }
        total += len;
        kept.push(msg);
    }
    kept.reverse();
    kept
}

/// The full error taxonomy an agent-loop invocation can terminate with
/// (spec.md §7 "Error taxonomy").
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentLoopError {
    /// Signalled by the caller (new request superseding this one). Never retried.
    #[error("cancelled")]
    Cancelled { context: Box<FailureContext> },

    /// Message budget still exceeded after pruning and truncation. Not retried.
    #[error("gathered too much context to answer within budget; narrow the request")]
    OverBudget { context: Box<FailureContext> },

    /// Wraps a [`ProviderError::RetryableTransport`] for the failover controller.
    #[error("retryable transport error: {0}")]
    RetryableTransport(String, Box<FailureContext>),

    /// Model returned no text and no tool calls twice in a row on the mini tier.
    #[error("empty response from provider after retry")]
    EmptyResponseEscalation { context: Box<FailureContext> },

    /// Model claimed a mutating action succeeded with no corresponding tool
    /// call, `session_claimed_action_count` times on the gemini mini tier.
    #[error("model claimed an unverified action")]
    ClaimedActionEscalation { context: Box<FailureContext> },

    /// Wraps a [`ProviderError::HardFailure`]. Not retried.
    #[error("request failed: {0}")]
    HardLlmError(String, Box<FailureContext>),

    /// A tool's `execute` threw; the loop attached this to the tool-result
    /// message and continued, but the per-tool block guard forced an exit.
    #[error("tool '{tool_name}' blocked after repeated identical errors: {last_error}")]
    ToolBlocked {
        tool_name: String,
        last_error: String,
        context: Box<FailureContext>,
    },

    /// Transient host-graph write contention ("n.map is not a function",
    /// "is not iterable"), retried with doubled delay before being raised here.
    #[error("graph write contention: {0}")]
    GraphWriteContention(String, Box<FailureContext>),

    /// Tool call targeted a server currently in the supply-chain suspension set.
    #[error("MCP server '{server_key}' is suspended pending schema-drift review")]
    DriftSuspension {
        server_key: String,
        context: Box<FailureContext>,
    },

    /// The provider's configured daily spending cap has been reached.
    #[error("daily spending cap reached; increase it in settings to continue")]
    DailyCapExceeded { context: Box<FailureContext> },

    /// The memory guard rejected a write for matching persistent-behavior-
    /// modification patterns.
    #[error("memory write rejected: {reason}")]
    MemoryWriteInjection {
        reason: String,
        context: Box<FailureContext>,
    },

    /// Exceeded `MAX_ITERATIONS` without a final response.
    #[error("exceeded maximum iterations")]
    MaxIterationsExceeded { context: Box<FailureContext> },
}

impl AgentLoopError {
    /// Classifies a provider-layer error into the agent-loop taxonomy,
    /// attaching failure context (spec.md §7 "Retryable transport" / "Hard LLM error").
    pub fn from_provider_error(err: ProviderError, context: FailureContext) -> Self {
        match err {
            ProviderError::RetryableTransport(msg) => {
                AgentLoopError::RetryableTransport(msg, Box::new(context))
            }
            ProviderError::HardFailure(msg) => {
                let truncated: String = msg.chars().take(180).collect();
                AgentLoopError::HardLlmError(truncated, Box::new(context))
            }
            ProviderError::Unavailable(msg) => {
                AgentLoopError::HardLlmError(msg, Box::new(context))
            }
        }
    }

    /// Whether the failover controller should attempt the next provider in
    /// the tier chain (spec.md §4.2 step 2).
    pub fn is_failover_eligible(&self) -> bool {
        matches!(self, AgentLoopError::RetryableTransport(..))
    }

    /// Whether this is one of the two escalation variants that restart on
    /// the same provider at the power tier (spec.md §4.2 step 1).
    pub fn is_escalation(&self) -> bool {
        matches!(
            self,
            AgentLoopError::EmptyResponseEscalation { .. }
                | AgentLoopError::ClaimedActionEscalation { .. }
        )
    }

    pub fn context(&self) -> &FailureContext {
        match self {
            AgentLoopError::Cancelled { context }
            | AgentLoopError::OverBudget { context }
            | AgentLoopError::EmptyResponseEscalation { context }
            | AgentLoopError::ClaimedActionEscalation { context }
            | AgentLoopError::ToolBlocked { context, .. }
            | AgentLoopError::DriftSuspension { context, .. }
            | AgentLoopError::DailyCapExceeded { context }
            | AgentLoopError::MemoryWriteInjection { context, .. }
            | AgentLoopError::MaxIterationsExceeded { context } => context,
            AgentLoopError::RetryableTransport(_, context)
            | AgentLoopError::HardLlmError(_, context)
            | AgentLoopError::GraphWriteContention(_, context) => context,
        }
    }

    /// The single human-readable response the user is shown (spec.md §7
    /// "Every failure path yields a single human-readable response").
    pub fn user_message(&self) -> String {
        match self {
            AgentLoopError::Cancelled { .. } => "Request cancelled.".to_string(),
            AgentLoopError::OverBudget { .. } => {
                "I gathered too much context to answer within budget — try narrowing the request.".to_string()
            }
            AgentLoopError::DailyCapExceeded { .. } => {
                "Daily spending cap reached. Increase it in Settings to continue.".to_string()
            }
            AgentLoopError::DriftSuspension { server_key, .. } => {
                format!("MCP server '{server_key}' is suspended pending a schema-drift review.")
            }
            AgentLoopError::MemoryWriteInjection { reason, .. } => {
                format!("Memory write rejected: {reason}")
            }
            other => format!("Request failed: {other}"),
        }
    }
}

/// Retry delays for graph-write contention (spec.md §7: "500 ms → 1 s → 2 s").
pub fn graph_write_contention_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(attempt.min(2)))
}

/// Substrings that mark a graph-write error as transient contention rather
/// than a permanent condition (spec.md §7).
pub fn is_graph_write_contention(message: &str) -> bool {
    let transient = message.contains("n.map is not a function") || message.contains("is not iterable");
    let permanent = ["not found", "invalid", "permission"]
        .iter()
        .any(|p| message.to_lowercase().contains(p));
    transient && !permanent
}
