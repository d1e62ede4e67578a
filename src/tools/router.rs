//! Tool resolution and the mutation approval gate (spec.md §4.4).
//!
//! [`ToolRouter`] sits between the agent loop and the raw [`ToolRegistry`]:
//! it canonicalizes whatever name/arguments shape the model produced
//! (including Composio's meta-tool indirection), decides whether the call
//! needs the user's approval before it runs, and tracks which MCP servers
//! are currently suspended for schema drift.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;

use crate::security::{RiskLevel, SecurityPolicy, ValidationResult};

use super::registry::ToolRegistry;
use super::traits::{Tool, ToolResult};

/// Name-fragments that mark a tool as mutating unless a read-only override
/// also matches (spec.md §4.4 "A tool is 'potentially mutating' iff its name
/// contains a create/update/delete/send-like token and no search/get/list
/// token").
const MUTATING_TOKENS: &[&str] = &[
    "create", "update", "delete", "remove", "send", "write", "post", "patch",
    "put", "archive", "move", "merge", "execute", "run", "spawn", "schedule",
    "cancel", "approve", "reject", "invite", "share", "publish",
];

const READONLY_OVERRIDE_TOKENS: &[&str] = &[
    "search", "get", "list", "read", "fetch", "find", "query", "describe",
    "preview", "dry_run", "validate",
];

/// Keys under which a Composio meta-tool (`COMPOSIO_MULTI_EXECUTE_TOOL` and
/// friends) nests the actual target tool name and arguments. Checked in order.
const COMPOSIO_ARG_KEYS: &[&str] = &["parameters", "params", "arguments", "input"];
const COMPOSIO_NAME_KEYS: &[&str] = &["tool", "action", "tool_slug", "name"];

/// Whether `name` looks like one of Composio's meta-tool entry points rather
/// than a concrete tool, by convention all-caps and underscore-separated.
fn looks_like_composio_meta_tool(name: &str) -> bool {
    name.starts_with("COMPOSIO_") || name == "MULTI_EXECUTE_TOOL"
}

/// Lower-cases and replaces spaces/dashes with underscores so `"Read File"`,
/// `"read-file"`, and `"read_file"` all resolve the same registry entry.
fn canonicalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Heuristic mutation classification for a resolved tool name (spec.md §4.4).
/// A [`Tool`] that reports its own [`super::traits::Tool::is_mutating`] wins
/// over this purely-textual fallback.
pub fn name_looks_mutating(name: &str) -> bool {
    let lower = name.to_lowercase();
    let has_mutating = MUTATING_TOKENS.iter().any(|t| lower.contains(t));
    let has_override = READONLY_OVERRIDE_TOKENS.iter().any(|t| lower.contains(t));
    has_mutating && !has_override
}

/// Result of routing one tool call through to a final decision.
pub enum RouteOutcome {
    /// The tool ran and produced a result.
    Executed(ToolResult),
    /// The call needs the user's explicit approval before it can run.
    NeedsApproval { tool_name: String, arguments: Value },
    /// The call was rejected outright (blocked, suspended server, unknown tool, ...).
    Denied(String),
}

/// Resolves tool calls against the registry and gates mutating calls behind
/// [`SecurityPolicy`]'s autonomy rules, honoring:
/// - a one-shot dry-run flag that simulates (never executes) the next
///   mutating call,
/// - session-scoped approvals that, once granted, allow the same tool name
///   to run without re-prompting for the rest of this loop,
/// - a read-only-mode allow-list override,
/// - a supply-chain suspension set of MCP server keys whose tools are
///   refused outright (spec.md §4.5 "Suspension").
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    policy: Arc<SecurityPolicy>,
    /// Tool names approved for the remainder of this session/loop.
    approved: Mutex<HashSet<String>>,
    /// When `true`, the next mutating call is simulated and this flag is
    /// cleared — it never persists across calls (spec.md §4.4 "one-shot").
    dry_run_armed: Mutex<bool>,
    /// MCP server keys currently suspended pending schema-drift review.
    suspended_servers: Mutex<HashSet<String>>,
}

impl ToolRouter {
    pub fn new(registry: Arc<ToolRegistry>, policy: Arc<SecurityPolicy>) -> Self {
        Self {
            registry,
            policy,
            approved: Mutex::new(HashSet::new()),
            dry_run_armed: Mutex::new(false),
            suspended_servers: Mutex::new(HashSet::new()),
        }
    }

    /// Arms the one-shot dry-run simulation for the next mutating call.
    pub fn arm_dry_run(&self) {
        *self.dry_run_armed.lock().expect("dry_run lock poisoned") = true;
    }

    /// Grants standing approval for `tool_name` for the rest of this session.
    pub fn approve_for_session(&self, tool_name: &str) {
        self.approved
            .lock()
            .expect("approved lock poisoned")
            .insert(canonicalize_name(tool_name));
    }

    /// Marks an MCP server as suspended; any tool call resolving to it is denied.
    pub fn suspend_server(&self, server_key: &str) {
        self.suspended_servers
            .lock()
            .expect("suspended lock poisoned")
            .insert(server_key.to_string());
    }

    pub fn unsuspend_server(&self, server_key: &str) {
        self.suspended_servers
            .lock()
            .expect("suspended lock poisoned")
            .remove(server_key);
    }

    pub fn is_server_suspended(&self, server_key: &str) -> bool {
        self.suspended_servers
            .lock()
            .expect("suspended lock poisoned")
            .contains(server_key)
    }

    /// Rescues `(tool_name, arguments)` out of a Composio meta-tool call's
    /// nested payload (spec.md §4.4 "argument rescue from `parameters`/`params`/
    /// bare keys"). Falls through to the original name/arguments unchanged
    /// when `name` doesn't look like a meta-tool or nothing recognizable is nested.
    fn rescue_composio_call(name: &str, arguments: &Value) -> (String, Value) {
        if !looks_like_composio_meta_tool(name) {
            return (name.to_string(), arguments.clone());
        }

        let target_name = COMPOSIO_NAME_KEYS
            .iter()
            .find_map(|key| arguments.get(key).and_then(Value::as_str))
            .map(str::to_string);

        let target_args = COMPOSIO_ARG_KEYS
            .iter()
            .find_map(|key| arguments.get(key).cloned())
            .unwrap_or_else(|| arguments.clone());

        match target_name {
            Some(resolved) => (resolved, target_args),
            None => (name.to_string(), arguments.clone()),
        }
    }

    /// Resolve `name` to a registered [`Tool`], trying the exact name first,
    /// then the canonicalized form, then Composio argument rescue. This is
    /// the tool-resolution order (spec.md §4.4) collapsed to the subset this
    /// crate's in-process registry can satisfy on its own; an MCP-aware
    /// resolver composes with this one by registering adapter `Tool`s into
    /// the same registry under their routed names.
    pub fn resolve(&self, name: &str, arguments: &Value) -> Option<(Arc<dyn Tool>, Value)> {
        if let Some(tool) = self.registry.get(name) {
            return Some((tool, arguments.clone()));
        }
        let canonical = canonicalize_name(name);
        if let Some(tool) = self.registry.get(&canonical) {
            return Some((tool, arguments.clone()));
        }
        let (rescued_name, rescued_args) = Self::rescue_composio_call(name, arguments);
        if rescued_name != name {
            if let Some(tool) = self.registry.get(&rescued_name) {
                return Some((tool, rescued_args));
            }
            let rescued_canonical = canonicalize_name(&rescued_name);
            if let Some(tool) = self.registry.get(&rescued_canonical) {
                return Some((tool, rescued_args));
            }
        }
        None
    }

    /// Full route: resolve, suspension check, mutation classification,
    /// approval gate, then execute (or simulate, for an armed dry run).
    #[tracing::instrument(skip_all, fields(tool = %name, server_key))]
    pub async fn route(&self, name: &str, arguments: Value, server_key: Option<&str>) -> RouteOutcome {
        if let Some(key) = server_key {
            if self.is_server_suspended(key) {
                return RouteOutcome::Denied(format!(
                    "MCP server '{key}' is suspended pending schema-drift review"
                ));
            }
        }

        let Some((tool, resolved_args)) = self.resolve(name, &arguments) else {
            return RouteOutcome::Denied(format!("no tool named '{name}' could be resolved"));
        };

        let is_mutating = tool.is_mutating().unwrap_or_else(|| name_looks_mutating(tool.name()));

        if is_mutating {
            let canonical = canonicalize_name(tool.name());
            let already_approved = self
                .approved
                .lock()
                .expect("approved lock poisoned")
                .contains(&canonical);

            if !already_approved {
                let risk = self.policy.evaluate_tool_risk(RiskLevel::Medium);
                match risk {
                    ValidationResult::Denied(reason) => return RouteOutcome::Denied(reason),
                    ValidationResult::NeedsApproval => {
                        return RouteOutcome::NeedsApproval {
                            tool_name: tool.name().to_string(),
                            arguments: resolved_args,
                        };
                    }
                    ValidationResult::Allowed => {}
                }
            }

            let mut armed = self.dry_run_armed.lock().expect("dry_run lock poisoned");
            if *armed {
                *armed = false;
                return RouteOutcome::Executed(
                    ToolResult::ok(format!(
                        "[dry run] would call '{}' with {}",
                        tool.name(),
                        resolved_args
                    ))
                    .with_metadata(serde_json::json!({"dry_run": true})),
                );
            }
        }

        match tool.execute(resolved_args).await {
            Ok(result) => RouteOutcome::Executed(result),
            Err(e) => RouteOutcome::Executed(ToolResult::err(e)),
        }
    }
}
