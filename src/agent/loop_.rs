//! `AgentLoop` — the core reasoning loop (spec.md §4.1).
//!
//! # Algorithm
//!
//! ```text
//! detect_sections(user_message) → build_system_prompt → assemble_messages
//!       │
//!       ▼
//! enforce_budget_in_place  (over budget even after pruning/truncation → OverBudget)
//!       │
//!       ▼
//! ┌─ per-tier attempt loop (mini → power → ludicrous on escalation) ──────────┐
//! │  FailoverController.call_tier()                                          │
//! │        │                                                                 │
//! │        ▼ no tool calls                      ▼ tool calls present         │
//! │  empty / claimed-action / leak / fabrication   per-iteration & per-tool  │
//! │  guards → maybe escalate, else final answer    caps, write-replay guard, │
//! │                                                 approval gate, execute   │
//! │        │                                              │                 │
//! │        └──────────────── iteration += 1 ───────────────┘                 │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ai::context::{
    assemble_messages, build_system_prompt, detect_sections, enforce_budget_in_place,
    extract_key_references, extract_workflow_suggestions, Section, SectionContent,
};
use crate::ai::sanitize::scrub_request;
use crate::ai::types::{CompletionRequest, Message, MessageRole, ToolSchema};
use crate::agent::errors::{AgentLoopError, FailureContext};
use crate::agent::failover::FailoverController;
use crate::agent::skills::GatheringGuard;
use crate::agent::turns::ConversationTurn;
use crate::config::schema::{ContextConfig, ModelTier};
use crate::event_bus::{AppEvent, EventBus};
use crate::tools::router::{RouteOutcome, ToolRouter};
use crate::tools::traits::ToolInfo;

// ─── AgentConfig ──────────────────────────────────────────────────────────────

/// Runtime configuration for an [`AgentLoop`] (spec.md §4.1, §4.2).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Concrete model id requested for each tier, independent of which
    /// provider in the tier's chain ends up serving it.
    pub models: HashMap<ModelTier, String>,
    /// `MAX_ITERATIONS` per tier attempt before `MaxIterationsExceeded`.
    pub max_iterations: usize,
    /// Per-tool call cap within one tier attempt (spec.md §4.1 "per-tool cap").
    pub max_calls_per_tool: usize,
    /// Per-iteration tool-call cap; calls beyond this are dropped with a note.
    pub max_tools_per_iteration: usize,
    /// A tool is blocked on its next attempt after two consecutive
    /// identical-error failures; this caps how many such blocks (across
    /// potentially different tools) the whole loop tolerates before exiting
    /// with `ToolBlocked` (spec.md §3/§7 two-level error mechanism).
    pub max_consecutive_tool_errors: usize,
    /// Number of claimed-unverified-actions on the mini tier before escalating.
    pub claimed_action_escalation_threshold: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Pause between iterations so a misbehaving loop can't hammer providers.
    pub inter_iteration_delay: Duration,
    pub context: ContextConfig,
    /// Mirrors `SecurityConfig::pii_scrub_enabled` (spec.md §3 invariant 7):
    /// gates the PII pass of outbound payload scrubbing. The control-string
    /// pass runs regardless of this flag.
    pub pii_scrub_enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(ModelTier::Mini, "gemini-2.5-flash".to_string());
        models.insert(ModelTier::Power, "claude-sonnet-4.5".to_string());
        models.insert(ModelTier::Ludicrous, "claude-opus-4".to_string());
        Self {
            models,
            max_iterations: 10,
            max_calls_per_tool: 5,
            max_tools_per_iteration: 4,
            max_consecutive_tool_errors: 3,
            claimed_action_escalation_threshold: 2,
            temperature: Some(0.7),
            max_tokens: Some(4096),
            inter_iteration_delay: Duration::from_millis(500),
            context: ContextConfig::default(),
            pii_scrub_enabled: false,
        }
    }
}

// ─── Per-call state carried across turns by the caller ─────────────────────

/// State that outlives a single [`AgentLoop::run`] call and must be threaded
/// back in on the next turn (spec.md §9 `SessionState` subset this loop owns).
#[derive(Debug, Clone, Default)]
pub struct AgentTurnState {
    /// `sessionClaimedActionCount` — consecutive unverified-action claims
    /// observed on the mini tier across turns.
    pub claimed_action_count: usize,
}

// ─── Turn input/output ───────────────────────────────────────────────────────

/// Everything one [`AgentLoop::run`] call needs beyond the provider/tool wiring.
pub struct AgentTurnInput<'a> {
    pub turns: &'a [ConversationTurn],
    pub user_message: &'a str,
    pub page_changed_notice: Option<&'a str>,
    pub section_content: &'a SectionContent,
    pub previous_sections: Option<&'a HashSet<Section>>,
    /// When `true`, only non-mutating tool calls run (spec.md §4.7 inbox
    /// processing: "Run the agent loop with `readOnlyTools: true`").
    /// Mutating calls are denied by the loop itself, before the router's
    /// approval gate ever sees them.
    pub read_only: bool,
    /// A skill resolved for this turn (e.g. via `cos_get_skill`), if any,
    /// whose required sources gate writes until satisfied (spec.md §4.1
    /// "Gathering guard").
    pub skill: Option<&'a crate::agent::skills::Skill>,
}

/// A finished agent turn.
#[derive(Debug, Clone)]
pub struct AgentTurnOutcome {
    pub response_text: String,
    pub provider: String,
    pub tier: ModelTier,
    pub iterations: usize,
    pub injection_hits: usize,
    pub sections_used: HashSet<Section>,
    pub key_reference_line: Option<String>,
    pub workflow_suggestion_line: Option<String>,
    pub successful_write_fingerprints: Vec<String>,
    pub tier_escalated: bool,
}

/// What [`AgentLoop::run`] produced: either a finished answer, or a mutating
/// tool call waiting on the user (spec.md §4.4 "NeedsApproval").
pub enum AgentTurnResult {
    Completed(Box<AgentTurnOutcome>),
    NeedsApproval {
        tool_name: String,
        arguments: Value,
        tier: ModelTier,
    },
}

// ─── AgentLoop ────────────────────────────────────────────────────────────────

/// The agent's reasoning loop: one [`AgentLoop::run`] call resolves one user
/// turn end-to-end, including provider failover and mini→power→ludicrous
/// tier escalation.
pub struct AgentLoop {
    failover: Arc<FailoverController>,
    router: Arc<ToolRouter>,
    bus: Option<Arc<dyn EventBus>>,
    config: AgentConfig,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl AgentLoop {
    pub fn new(
        failover: Arc<FailoverController>,
        router: Arc<ToolRouter>,
        bus: Option<Arc<dyn EventBus>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            failover,
            router,
            bus,
            config,
            cancel_flag: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(AtomicOrdering::SeqCst))
            .unwrap_or(false)
    }

    fn emit(&self, event: AppEvent) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(event);
        }
    }

    /// Run one user turn to completion, escalating tiers as the guard suite
    /// demands (spec.md §4.1 step "Failure semantics").
    #[tracing::instrument(skip_all, fields(read_only = input.read_only, tier = tracing::field::Empty))]
    pub async fn run(
        &self,
        input: AgentTurnInput<'_>,
        state: &mut AgentTurnState,
        tool_schemas: Vec<ToolSchema>,
    ) -> Result<AgentTurnResult, AgentLoopError> {
        let sections = detect_sections(input.user_message, input.previous_sections);
        let (system_prompt, section_hits) = build_system_prompt(&sections, input.section_content);
        let mut messages = assemble_messages(input.turns, input.user_message, input.page_changed_notice);

        let schema_overhead: usize = tool_schemas
            .iter()
            .map(|t| t.name.len() + t.description.len() + t.input_schema.to_string().len())
            .sum();
        let overhead = system_prompt.len() + schema_overhead;
        let report = enforce_budget_in_place(
            &mut messages,
            self.config.context.message_budget_chars,
            overhead,
            self.config.context.min_tool_result_chars,
        );
        if report.still_over_budget {
            let ctx = FailureContext::new(&messages, 0, "none", "none");
            return Err(AgentLoopError::OverBudget {
                context: Box::new(ctx),
            });
        }

        let mut tier = ModelTier::Mini;
        tracing::Span::current().record("tier", tracing::field::debug(tier));
        let mut pinned_provider: Option<String> = None;
        let mut carry_fingerprints: Vec<String> = Vec::new();
        let mut escalated = false;
        let mut guard = input.skill.and_then(GatheringGuard::for_skill);

        loop {
            match self
                .attempt_tier(
                    tier,
                    pinned_provider.as_deref(),
                    &system_prompt,
                    messages.clone(),
                    &tool_schemas,
                    section_hits,
                    &sections,
                    state,
                    &carry_fingerprints,
                    input.read_only,
                    guard.as_mut(),
                )
                .await
            {
                Ok(AttemptOutcome::Completed(mut outcome)) => {
                    outcome.tier_escalated = escalated;
                    return Ok(AgentTurnResult::Completed(Box::new(outcome)));
                }
                Ok(AttemptOutcome::NeedsApproval { tool_name, arguments }) => {
                    return Ok(AgentTurnResult::NeedsApproval {
                        tool_name,
                        arguments,
                        tier,
                    });
                }
                Err(err @ AgentLoopError::EmptyResponseEscalation { .. })
                | Err(err @ AgentLoopError::ClaimedActionEscalation { .. }) => {
                    let context = err.context().clone();
                    let next = FailoverController::next_tier(tier);
                    let can_escalate = match next {
                        Some(ModelTier::Ludicrous) => self.failover.ludicrous_enabled(),
                        Some(_) => true,
                        None => false,
                    };
                    if !can_escalate || !context.can_carry_over {
                        return Err(err);
                    }
                    let Some(next_tier) = next else { return Err(err) };
                    pinned_provider = Some(context.provider.clone());
                    carry_fingerprints = context.successful_write_fingerprints.clone();
                    messages = context.accumulated_messages.clone();
                    messages.push(Message::system(
                        "[Continuing from a prior attempt at a lower tier — do not repeat \
                         actions already confirmed successful above.]",
                    ));
                    tier = next_tier;
                    tracing::Span::current().record("tier", tracing::field::debug(tier));
                    escalated = true;
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_tier(
        &self,
        tier: ModelTier,
        pinned_provider: Option<&str>,
        system_prompt: &str,
        mut messages: Vec<Message>,
        tool_schemas: &[ToolSchema],
        mut injection_hits: usize,
        sections: &HashSet<Section>,
        state: &mut AgentTurnState,
        carry_fingerprints: &[String],
        read_only: bool,
        mut guard: Option<&mut GatheringGuard>,
    ) -> Result<AttemptOutcome, AgentLoopError> {
        let model = self
            .config
            .models
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| "default".to_string());

        let mut iteration = 0usize;
        let mut consecutive_empty = 0usize;
        let mut tool_call_counts: HashMap<String, usize> = HashMap::new();
        // Per-tool error-string identity tracking, plus the set of tools
        // currently blocked after two consecutive identical errors and the
        // loop-wide count of such blocks (spec.md §3/§7).
        let mut last_tool_error: HashMap<String, String> = HashMap::new();
        let mut consecutive_identical_errors: HashMap<String, usize> = HashMap::new();
        let mut blocked_tools: HashSet<String> = HashSet::new();
        let mut loop_wide_blocks = 0usize;
        let mut mcp_result_texts: Vec<String> = Vec::new();
        let mut successful_write_fingerprints: Vec<String> = Vec::new();
        let mut provider_used = pinned_provider.map(str::to_string).unwrap_or_default();

        loop {
            if self.is_cancelled() {
                let ctx = FailureContext::new(&messages, iteration, &provider_used, tier.as_str());
                return Err(AgentLoopError::Cancelled {
                    context: Box::new(ctx),
                });
            }
            if iteration >= self.config.max_iterations {
                let ctx = FailureContext::new(&messages, iteration, &provider_used, tier.as_str());
                return Err(AgentLoopError::MaxIterationsExceeded {
                    context: Box::new(ctx),
                });
            }

            let mut request = CompletionRequest::new(model.clone(), system_prompt.to_string(), messages.clone())
                .with_tools(tool_schemas.to_vec());
            if let Some(t) = self.config.temperature {
                request = request.with_temperature(t);
            }
            if let Some(m) = self.config.max_tokens {
                request = request.with_max_tokens(m);
            }
            scrub_request(&mut request, self.config.pii_scrub_enabled);

            let call_result = match pinned_provider {
                Some(name) => match self.failover.provider(name) {
                    Some(provider) => provider
                        .call(request)
                        .await
                        .map(|response| (response, name.to_string())),
                    None => Err(crate::ai::provider::ProviderError::Unavailable(format!(
                        "provider '{name}' is no longer configured"
                    ))),
                },
                None => self
                    .failover
                    .call_tier(tier, &request)
                    .await
                    .map(|outcome| (outcome.response, outcome.provider)),
            };

            let (response, provider_name) = match call_result {
                Ok(pair) => pair,
                Err(provider_err) => {
                    let ctx = FailureContext::new(&messages, iteration, &provider_used, tier.as_str())
                        .with_write_fingerprints(successful_write_fingerprints.clone());
                    return Err(AgentLoopError::from_provider_error(provider_err, ctx));
                }
            };
            provider_used = provider_name;

            if response.tool_calls.is_empty() {
                let content = response.content.trim();

                if content.is_empty() {
                    consecutive_empty += 1;
                    if tier == ModelTier::Mini && consecutive_empty >= 2 {
                        let ctx = FailureContext::new(&messages, iteration, &provider_used, tier.as_str())
                            .with_write_fingerprints(successful_write_fingerprints.clone());
                        return Err(AgentLoopError::EmptyResponseEscalation {
                            context: Box::new(ctx),
                        });
                    }
                    messages.push(Message::assistant(response.content.clone()));
                    messages.push(Message::user(
                        "Your last response was empty. Please answer the question or call a tool.",
                    ));
                    iteration += 1;
                    tokio::time::sleep(self.config.inter_iteration_delay).await;
                    continue;
                }

                // Only a claim with no successful tool call backing it this attempt
                // is unverified — a model that wrote successfully and then reported
                // it is not penalized (spec.md §4.1 "no tool call succeeded").
                if claims_unverified_action(content) && successful_write_fingerprints.is_empty() {
                    state.claimed_action_count += 1;
                    if tier == ModelTier::Mini
                        && state.claimed_action_count >= self.config.claimed_action_escalation_threshold
                    {
                        let ctx = FailureContext::new(&messages, iteration, &provider_used, tier.as_str())
                            .with_write_fingerprints(successful_write_fingerprints.clone());
                        return Err(AgentLoopError::ClaimedActionEscalation {
                            context: Box::new(ctx),
                        });
                    }
                } else {
                    state.claimed_action_count = 0;
                }

                if leaks_system_prompt(content, system_prompt) {
                    self.emit(AppEvent::InjectionWarning {
                        source: "assistant_response".to_string(),
                        pattern_count: 1,
                    });
                }

                let (_, live_hits) = crate::ai::context::sanitize_untrusted_block("mcp_result", &mcp_result_texts.join("\n"));
                let fabricated = fabricates_key_reference(content, &mcp_result_texts);
                if fabricated {
                    self.emit(AppEvent::InjectionWarning {
                        source: "fabricated_key_reference".to_string(),
                        pattern_count: 1,
                    });
                }
                injection_hits += live_hits;

                let key_reference_line = extract_key_references(&mcp_result_texts);
                let workflow_suggestion_line = extract_workflow_suggestions(content);

                return Ok(AttemptOutcome::Completed(AgentTurnOutcome {
                    response_text: response.content.clone(),
                    provider: provider_used,
                    tier,
                    iterations: iteration + 1,
                    injection_hits,
                    sections_used: sections.clone(),
                    key_reference_line,
                    workflow_suggestion_line,
                    successful_write_fingerprints,
                    tier_escalated: false,
                }));
            }

            consecutive_empty = 0;
            let mut calls = response.tool_calls.clone();
            if calls.len() > self.config.max_tools_per_iteration {
                calls.truncate(self.config.max_tools_per_iteration);
            }

            messages.push(Message::assistant_with_tool_calls(response.content.clone(), calls.clone()));

            for call in &calls {
                let count = tool_call_counts.entry(call.name.clone()).or_insert(0);
                *count += 1;
                if *count > self.config.max_calls_per_tool {
                    let ctx = FailureContext::new(&messages, iteration, &provider_used, tier.as_str())
                        .with_write_fingerprints(successful_write_fingerprints.clone());
                    return Err(AgentLoopError::ToolBlocked {
                        tool_name: call.name.clone(),
                        last_error: "per-tool call cap exceeded".to_string(),
                        context: Box::new(ctx),
                    });
                }

                let fingerprint = fingerprint_call(&call.name, &call.arguments);
                if carry_fingerprints.contains(&fingerprint) {
                    messages.push(Message::tool_result(
                        call.id.clone(),
                        "Already completed successfully in a previous attempt; not repeated.",
                        false,
                    ));
                    continue;
                }

                if blocked_tools.contains(&call.name) {
                    let reason = format!(
                        "'{}' is temporarily blocked after two consecutive identical errors.",
                        call.name
                    );
                    messages.push(Message::tool_result(call.id.clone(), reason, true));
                    continue;
                }

                let resolved = self.router.resolve(&call.name, &call.arguments);
                let is_mutating_call = resolved
                    .as_ref()
                    .map(|(tool, _)| {
                        tool.is_mutating()
                            .unwrap_or_else(|| crate::tools::router::name_looks_mutating(tool.name()))
                    })
                    .unwrap_or_else(|| crate::tools::router::name_looks_mutating(&call.name));

                if is_mutating_call && read_only {
                    let reason = format!(
                        "'{}' is a write operation; this run is read-only.",
                        call.name
                    );
                    messages.push(Message::tool_result(call.id.clone(), reason, true));
                    continue;
                }

                if is_mutating_call {
                    if let Some(g) = guard.as_deref() {
                        if !g.is_complete() {
                            let nudge = g.nudge_text();
                            messages.push(Message::tool_result(call.id.clone(), nudge, true));
                            continue;
                        }
                    }
                }

                self.emit(AppEvent::AgentToolStart {
                    tool_name: call.name.clone(),
                    args: call.arguments.clone(),
                });

                match self.router.route(&call.name, call.arguments.clone(), None).await {
                    RouteOutcome::NeedsApproval { tool_name, arguments } => {
                        return Ok(AttemptOutcome::NeedsApproval { tool_name, arguments });
                    }
                    RouteOutcome::Denied(reason) => {
                        self.emit(AppEvent::AgentToolResult {
                            tool_name: call.name.clone(),
                            result: reason.clone(),
                            success: false,
                        });
                        messages.push(Message::tool_result(call.id.clone(), reason, true));
                    }
                    RouteOutcome::Executed(result) => {
                        self.emit(AppEvent::AgentToolResult {
                            tool_name: call.name.clone(),
                            result: result.output.clone(),
                            success: result.success,
                        });
                        if result.success {
                            consecutive_identical_errors.remove(&call.name);
                            last_tool_error.remove(&call.name);
                            if let Some(g) = guard.as_deref_mut() {
                                g.record_success(&call.name);
                            }
                            if crate::tools::router::name_looks_mutating(&call.name) {
                                successful_write_fingerprints.push(fingerprint);
                            }
                            mcp_result_texts.push(result.output.clone());
                        } else {
                            let same_as_last =
                                last_tool_error.get(&call.name).map(String::as_str) == Some(result.output.as_str());
                            let count = if same_as_last {
                                let c = consecutive_identical_errors.entry(call.name.clone()).or_insert(0);
                                *c += 1;
                                *c
                            } else {
                                consecutive_identical_errors.insert(call.name.clone(), 1);
                                1
                            };
                            last_tool_error.insert(call.name.clone(), result.output.clone());

                            // Two consecutive identical errors block the tool on its
                            // next attempt; the rest of the loop keeps running. Only
                            // once enough tools (or this one, repeatedly) have been
                            // blocked does the whole loop give up.
                            if count >= 2 {
                                blocked_tools.insert(call.name.clone());
                                loop_wide_blocks += 1;
                                if loop_wide_blocks >= self.config.max_consecutive_tool_errors {
                                    let ctx = FailureContext::new(&messages, iteration, &provider_used, tier.as_str())
                                        .with_write_fingerprints(successful_write_fingerprints.clone());
                                    return Err(AgentLoopError::ToolBlocked {
                                        tool_name: call.name.clone(),
                                        last_error: result.output.clone(),
                                        context: Box::new(ctx),
                                    });
                                }
                            }
                        }
                        messages.push(Message::tool_result(call.id.clone(), result.output, !result.success));
                    }
                }
            }

            iteration += 1;
            tokio::time::sleep(self.config.inter_iteration_delay).await;
        }
    }
}

enum AttemptOutcome {
    Completed(AgentTurnOutcome),
    NeedsApproval { tool_name: String, arguments: Value },
}

/// `ToolSchema` list built from a registry's `ToolInfo`s, for the request's
/// `tools` field.
pub fn tool_schemas_from_infos(infos: &[ToolInfo]) -> Vec<ToolSchema> {
    infos
        .iter()
        .map(|info| ToolSchema {
            name: info.name.clone(),
            description: info.description.clone(),
            input_schema: info.schema.clone(),
        })
        .collect()
}

/// Phrases claiming a mutating action succeeded with no tool call backing
/// them (spec.md §4.1 "claimed action" guard).
fn claims_unverified_action(content: &str) -> bool {
    const PHRASES: &[&str] = &[
        "i've deleted", "i have deleted", "i've sent", "i have sent",
        "i've created", "i have created", "i've updated", "i have updated",
        "i've scheduled", "i have scheduled", "i've moved", "i have moved",
        "i've archived", "i have archived", "done! i", "i just sent",
        "i just deleted", "i just created",
    ];
    let lower = content.to_lowercase();
    PHRASES.iter().any(|p| lower.contains(p))
}

/// Whether the assistant's response reproduces a long run of the system
/// prompt verbatim (spec.md §4.1 "system-prompt leakage" guard).
fn leaks_system_prompt(content: &str, system_prompt: &str) -> bool {
    const WINDOW: usize = 80;
    if system_prompt.len() < WINDOW {
        return false;
    }
    system_prompt
        .as_bytes()
        .windows(WINDOW)
        .step_by(WINDOW / 2)
        .any(|w| {
            std::str::from_utf8(w)
                .map(|s| content.contains(s))
                .unwrap_or(false)
        })
}

/// Detects a `Key:` reference in the response that never appeared in any
/// tool result this turn — the model inventing an identifier rather than
/// reading one back (spec.md §4.1 "MCP fabrication" guard).
fn fabricates_key_reference(content: &str, tool_results: &[String]) -> bool {
    let Some(from_content) = extract_key_references(&[content.to_string()]) else {
        return false;
    };
    let from_tools = extract_key_references(tool_results).unwrap_or_default();
    from_content
        .split("; ")
        .any(|entry| !from_tools.contains(entry) && !tool_results.iter().any(|t| t.contains(entry)))
}

fn fingerprint_call(name: &str, arguments: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(arguments.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::ProviderError;
    use crate::ai::types::{CompletionResponse, ToolCallDelta};
    use crate::config::schema::ProviderConfig;
    use crate::security::{AutonomyLevel, SecurityPolicy};
    use crate::tools::{Tool, ToolRegistry, ToolResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        name: String,
        responses: Vec<CompletionResponse>,
        index: AtomicUsize,
    }

    #[async_trait]
    impl crate::ai::provider::LLMProvider for ScriptedProvider {
        async fn call(
            &self,
            _request: CompletionRequest,
        ) -> crate::ai::provider::Result<CompletionResponse> {
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(i)
                .cloned()
                .ok_or_else(|| ProviderError::HardFailure("no more scripted responses".into()))
        }
        fn context_limit(&self) -> usize {
            128_000
        }
        fn supports_tools(&self) -> bool {
            true
        }
        fn provider_name(&self) -> &str {
            &self.name
        }
        fn cost_usd(&self, _m: &str, _i: u32, _o: u32) -> f64 {
            0.0
        }
    }

    fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            content: text.to_string(),
            tool_calls: vec![],
            model: "test".into(),
            usage: None,
            finish_reason: Some("stop".into()),
        }
    }

    fn tool_call_response(name: &str, args: Value) -> CompletionResponse {
        CompletionResponse {
            content: String::new(),
            tool_calls: vec![ToolCallDelta {
                id: "call_1".into(),
                name: name.to_string(),
                arguments: args,
                provider_extra: Default::default(),
            }],
            model: "test".into(),
            usage: None,
            finish_reason: Some("tool_calls".into()),
        }
    }

    struct EchoTool;
    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, args: Value) -> Result<ToolResult, String> {
            Ok(ToolResult::ok(args.to_string()))
        }
    }

    struct DeleteTool;
    #[async_trait]
    impl Tool for DeleteTool {
        fn name(&self) -> &str {
            "delete_thing"
        }
        fn description(&self) -> &str {
            "deletes a thing"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
            Ok(ToolResult::ok("deleted".to_string()))
        }
    }

    struct FlakyTool {
        name: &'static str,
    }
    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "always fails the same way"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
            Ok(ToolResult::err("boom: same failure every time"))
        }
    }

    fn build_loop(responses: Vec<CompletionResponse>, config: AgentConfig) -> AgentLoop {
        let provider = Arc::new(ScriptedProvider {
            name: "test-provider".into(),
            responses,
            index: AtomicUsize::new(0),
        });
        let mut providers: HashMap<String, Arc<dyn crate::ai::provider::LLMProvider>> = HashMap::new();
        providers.insert("test-provider".into(), provider);
        let provider_config = ProviderConfig {
            mini_chain: vec!["test-provider".into()],
            power_chain: vec!["test-provider".into()],
            ..Default::default()
        };
        let failover = Arc::new(FailoverController::new(providers, provider_config));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(DeleteTool));
        registry.register(Arc::new(FlakyTool { name: "flaky_a" }));
        registry.register(Arc::new(FlakyTool { name: "flaky_b" }));
        registry.register(Arc::new(FlakyTool { name: "flaky_c" }));
        let policy = Arc::new(SecurityPolicy::new(AutonomyLevel::Full, None, vec![], 3600, 1000));
        let router = Arc::new(ToolRouter::new(Arc::new(registry), policy));

        AgentLoop::new(failover, router, None, AgentConfig {
            inter_iteration_delay: Duration::from_millis(0),
            ..config
        })
    }

    fn empty_section_content() -> SectionContent {
        SectionContent {
            core: "You are a helpful agent.".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_turn_no_tool_calls_returns_final_answer() {
        let agent = build_loop(vec![text_response("Hello there.")], AgentConfig::default());
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "hi",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let result = agent.run(input, &mut state, vec![]).await.unwrap();
        match result {
            AgentTurnResult::Completed(outcome) => {
                assert_eq!(outcome.response_text, "Hello there.");
                assert_eq!(outcome.provider, "test-provider");
            }
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn tool_call_executes_then_final_answer() {
        let agent = build_loop(
            vec![
                tool_call_response("echo", serde_json::json!({"message": "ping"})),
                text_response("Done."),
            ],
            AgentConfig::default(),
        );
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "use echo",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let result = agent.run(input, &mut state, vec![]).await.unwrap();
        match result {
            AgentTurnResult::Completed(outcome) => assert_eq!(outcome.response_text, "Done."),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn unresolvable_tool_is_reported_back_as_denied() {
        let agent = build_loop(
            vec![
                tool_call_response("nonexistent_tool", serde_json::json!({})),
                text_response("Could not find that tool."),
            ],
            AgentConfig::default(),
        );
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "do something",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let result = agent.run(input, &mut state, vec![]).await.unwrap();
        match result {
            AgentTurnResult::Completed(outcome) => {
                assert_eq!(outcome.response_text, "Could not find that tool.");
            }
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn per_tool_call_cap_blocks_after_repeated_calls() {
        let responses: Vec<CompletionResponse> = (0..10)
            .map(|_| tool_call_response("echo", serde_json::json!({"message": "loop"})))
            .collect();
        let agent = build_loop(
            responses,
            AgentConfig {
                max_calls_per_tool: 2,
                max_iterations: 20,
                ..AgentConfig::default()
            },
        );
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "loop forever",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let err = agent.run(input, &mut state, vec![]).await.unwrap_err();
        assert!(matches!(err, AgentLoopError::ToolBlocked { .. }));
    }

    #[tokio::test]
    async fn max_iterations_exceeded_when_tool_calls_never_stop() {
        let responses: Vec<CompletionResponse> = (0..10)
            .map(|i| tool_call_response("echo", serde_json::json!({"i": i})))
            .collect();
        let agent = build_loop(
            responses,
            AgentConfig {
                max_iterations: 3,
                max_calls_per_tool: 100,
                ..AgentConfig::default()
            },
        );
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "loop forever",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let err = agent.run(input, &mut state, vec![]).await.unwrap_err();
        assert!(matches!(err, AgentLoopError::MaxIterationsExceeded { .. }));
    }

    #[tokio::test]
    async fn empty_response_twice_on_mini_escalates() {
        let agent = build_loop(
            vec![text_response(""), text_response(""), text_response("Recovered at power tier.")],
            AgentConfig::default(),
        );
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "hi",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let result = agent.run(input, &mut state, vec![]).await.unwrap();
        match result {
            AgentTurnResult::Completed(outcome) => {
                assert!(outcome.tier_escalated);
                assert_eq!(outcome.tier, ModelTier::Power);
            }
            _ => panic!("expected completion after escalation"),
        }
    }

    #[tokio::test]
    async fn tool_blocked_after_two_identical_errors_but_loop_continues() {
        let agent = build_loop(
            vec![
                tool_call_response("flaky_a", serde_json::json!({})),
                tool_call_response("flaky_a", serde_json::json!({})),
                tool_call_response("echo", serde_json::json!({"message": "still alive"})),
                text_response("Recovered after the tool was blocked."),
            ],
            AgentConfig {
                max_iterations: 10,
                ..AgentConfig::default()
            },
        );
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "keep trying",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let result = agent.run(input, &mut state, vec![]).await.unwrap();
        match result {
            AgentTurnResult::Completed(outcome) => {
                assert_eq!(outcome.response_text, "Recovered after the tool was blocked.");
            }
            _ => panic!("a single tool's two identical failures must not kill the whole loop"),
        }
    }

    #[tokio::test]
    async fn loop_exits_after_three_tools_each_get_blocked() {
        let agent = build_loop(
            vec![
                tool_call_response("flaky_a", serde_json::json!({})),
                tool_call_response("flaky_a", serde_json::json!({})),
                tool_call_response("flaky_b", serde_json::json!({})),
                tool_call_response("flaky_b", serde_json::json!({})),
                tool_call_response("flaky_c", serde_json::json!({})),
                tool_call_response("flaky_c", serde_json::json!({})),
            ],
            AgentConfig {
                max_iterations: 10,
                ..AgentConfig::default()
            },
        );
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "keep trying different tools",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let err = agent.run(input, &mut state, vec![]).await.unwrap_err();
        assert!(matches!(err, AgentLoopError::ToolBlocked { .. }));
    }

    #[test]
    fn claims_unverified_action_detects_common_phrasing() {
        assert!(claims_unverified_action("I've deleted the page for you."));
        assert!(claims_unverified_action("Done! I sent the email."));
        assert!(!claims_unverified_action("I can help you with that."));
    }

    #[test]
    fn fingerprint_call_is_stable_for_same_input() {
        let a = fingerprint_call("delete_page", &serde_json::json!({"id": "1"}));
        let b = fingerprint_call("delete_page", &serde_json::json!({"id": "1"}));
        let c = fingerprint_call("delete_page", &serde_json::json!({"id": "2"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn read_only_run_denies_mutating_tool_calls() {
        let agent = build_loop(
            vec![
                tool_call_response("delete_thing", serde_json::json!({})),
                text_response("Could not delete; this run is read-only."),
            ],
            AgentConfig::default(),
        );
        let turns = vec![];
        let content = empty_section_content();
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "delete the thing",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: true,
            skill: None,
        };
        let mut state = AgentTurnState::default();
        let result = agent.run(input, &mut state, vec![]).await.unwrap();
        match result {
            AgentTurnResult::Completed(outcome) => {
                assert!(outcome.successful_write_fingerprints.is_empty());
            }
            _ => panic!("expected completion with the mutating call denied, not approval"),
        }
    }

    #[tokio::test]
    async fn gathering_guard_nudges_before_required_sources_are_satisfied() {
        let agent = build_loop(
            vec![
                tool_call_response("delete_thing", serde_json::json!({})),
                tool_call_response("echo", serde_json::json!({"search": "things"})),
                tool_call_response("delete_thing", serde_json::json!({})),
                text_response("Deleted after gathering."),
            ],
            AgentConfig::default(),
        );
        let turns = vec![];
        let content = empty_section_content();
        let skill = crate::agent::skills::Skill::new("cleanup", vec!["delete the thing".into()])
            .with_required_sources(vec!["echo".into()]);
        let input = AgentTurnInput {
            turns: &turns,
            user_message: "delete the thing",
            page_changed_notice: None,
            section_content: &content,
            previous_sections: None,
            read_only: false,
            skill: Some(&skill),
        };
        let mut state = AgentTurnState::default();
        let result = agent.run(input, &mut state, vec![]).await.unwrap();
        match result {
            AgentTurnResult::Completed(outcome) => {
                assert_eq!(outcome.successful_write_fingerprints.len(), 1);
            }
            _ => panic!("expected completion once gathering finished"),
        }
    }
}
