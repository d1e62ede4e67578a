//! The four Composio meta-tools (spec.md §4.4 tool resolution order, step 7):
//! `COMPOSIO_SEARCH_TOOLS`, `COMPOSIO_MULTI_EXECUTE_TOOL`,
//! `COMPOSIO_MANAGE_CONNECTIONS`, `COMPOSIO_GET_CONNECTED_ACCOUNTS`.
//!
//! All four proxy to the single configured Composio MCP endpoint
//! ([`COMPOSIO_SERVER_KEY`]) rather than a bespoke REST client, the same way
//! [`super::meta_tools::McpExecuteTool`] proxies to a routed server —
//! Composio is, per spec.md's glossary, "the external remote tool aggregator
//! accessed via one MCP-style URL".

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::ToolRegistry;
use crate::tools::traits::{Tool, ToolResult, ToolSource};

use super::lifecycle::McpManager;
use super::COMPOSIO_SERVER_KEY;

/// Canonicalizes a Composio tool slug the same way `ToolRouter` canonicalizes
/// native tool names, so `"Gmail Send Email"`, `"gmail-send-email"`, and
/// `"GMAIL_SEND_EMAIL"` all compare equal.
fn canonicalize_slug(slug: &str) -> String {
    slug.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Finds the best match for `slug` among `candidates` (composio's live
/// schema registry), tolerating the model slightly mangling a slug. Exact
/// canonical match wins outright; otherwise the candidate containing the
/// longest shared substring with `slug` wins, as long as it shares at least
/// half of `slug`'s length.
fn fuzzy_match_slug<'a>(slug: &str, candidates: &'a [String]) -> Option<&'a str> {
    let target = canonicalize_slug(slug);
    if let Some(exact) = candidates.iter().find(|c| canonicalize_slug(c) == target) {
        return Some(exact.as_str());
    }

    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
        let canon = canonicalize_slug(candidate);
        let score = if canon.contains(&target) || target.contains(&canon) {
            canon.len().min(target.len())
        } else {
            0
        };
        if score > 0 && score * 2 >= target.len() && best.map(|(_, b)| score > b).unwrap_or(true) {
            best = Some((candidate.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

/// Searches Composio's connected toolkit catalogue by keyword, slug-matching
/// loosely since the model rarely spells a slug exactly right.
pub struct ComposioSearchTools {
    manager: Arc<McpManager>,
}

impl ComposioSearchTools {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ComposioSearchTools {
    fn name(&self) -> &str {
        "COMPOSIO_SEARCH_TOOLS"
    }

    fn description(&self) -> &str {
        "Search the connected Composio toolkits' tool catalogue by keyword. Returns matching tool slugs and descriptions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Keyword to match against tool slugs and descriptions" },
                "toolkit": { "type": "string", "description": "Optional toolkit name to narrow the search (e.g. GMAIL)" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or("missing required field 'query'")?
            .to_lowercase();
        let toolkit = args.get("toolkit").and_then(|v| v.as_str()).map(str::to_uppercase);

        if self.manager.is_suspended(COMPOSIO_SERVER_KEY).await {
            return Ok(ToolResult::err(
                "Composio server is suspended pending schema-drift review",
            ));
        }

        let tools = self.manager.tools_for(COMPOSIO_SERVER_KEY).await;
        let matches: Vec<_> = tools
            .iter()
            .filter(|t| {
                let name_matches =
                    t.name.to_lowercase().contains(&query) || t.description.to_lowercase().contains(&query);
                let toolkit_matches = toolkit
                    .as_deref()
                    .map(|tk| t.name.to_uppercase().starts_with(tk))
                    .unwrap_or(true);
                name_matches && toolkit_matches
            })
            .map(|t| json!({ "slug": t.name, "description": t.description }))
            .collect();

        if matches.is_empty() {
            return Ok(ToolResult::ok(format!("no connected tools match '{query}'")));
        }

        let output = serde_json::to_string_pretty(&matches).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(output).with_metadata(json!({ "matches": matches })))
    }

    fn is_mutating(&self) -> Option<bool> {
        Some(false)
    }

    fn source(&self) -> ToolSource {
        ToolSource::Composio
    }
}

/// One `{tool_slug, arguments}` entry of a `COMPOSIO_MULTI_EXECUTE_TOOL` call.
#[derive(Debug, serde::Deserialize)]
struct MultiExecuteCall {
    #[serde(alias = "slug", alias = "tool", alias = "action")]
    tool_slug: String,
    #[serde(default, alias = "params", alias = "parameters", alias = "input")]
    arguments: Value,
}

/// Dispatches a batch of `{tool_slug, arguments}` calls, intercepting any
/// slug that actually names a locally registered tool and running it there
/// instead of over the Composio transport (spec.md §4.4 step 7).
pub struct ComposioMultiExecuteTool {
    manager: Arc<McpManager>,
    registry: Arc<ToolRegistry>,
}

impl ComposioMultiExecuteTool {
    pub fn new(manager: Arc<McpManager>, registry: Arc<ToolRegistry>) -> Self {
        Self { manager, registry }
    }
}

#[async_trait]
impl Tool for ComposioMultiExecuteTool {
    fn name(&self) -> &str {
        "COMPOSIO_MULTI_EXECUTE_TOOL"
    }

    fn description(&self) -> &str {
        "Execute one or more Composio tool calls in sequence. Each call is {tool_slug, arguments}; slugs that match a local tool run locally."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "calls": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "tool_slug": { "type": "string" },
                            "arguments": { "type": "object" }
                        },
                        "required": ["tool_slug"]
                    }
                }
            },
            "required": ["calls"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let calls_raw = args
            .get("calls")
            .cloned()
            .ok_or("missing required field 'calls'")?;
        let calls: Vec<MultiExecuteCall> =
            serde_json::from_value(calls_raw).map_err(|e| format!("invalid 'calls' shape: {e}"))?;
        if calls.is_empty() {
            return Ok(ToolResult::ok("no calls to execute"));
        }

        if self.manager.is_suspended(COMPOSIO_SERVER_KEY).await {
            return Ok(ToolResult::err(
                "Composio server is suspended pending schema-drift review",
            ));
        }

        let remote_tools = self.manager.tools_for(COMPOSIO_SERVER_KEY).await;
        let remote_names: Vec<String> = remote_tools.iter().map(|t| t.name.clone()).collect();
        let transport = self.manager.transport_for(COMPOSIO_SERVER_KEY).await;

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let canonical = canonicalize_slug(&call.tool_slug);

            if let Some(local_tool) = self.registry.get(&canonical).or_else(|| self.registry.get(&call.tool_slug)) {
                let outcome = local_tool.execute(call.arguments.clone()).await;
                results.push(match outcome {
                    Ok(r) => json!({ "tool_slug": call.tool_slug, "success": r.success, "output": r.output }),
                    Err(e) => json!({ "tool_slug": call.tool_slug, "success": false, "output": e }),
                });
                continue;
            }

            let Some(matched) = fuzzy_match_slug(&call.tool_slug, &remote_names) else {
                results.push(json!({
                    "tool_slug": call.tool_slug,
                    "success": false,
                    "output": format!("no connected tool matches slug '{}'", call.tool_slug),
                }));
                continue;
            };

            let Some(transport) = transport.as_ref() else {
                results.push(json!({
                    "tool_slug": call.tool_slug,
                    "success": false,
                    "output": "Composio server is not connected",
                }));
                continue;
            };

            match transport.call_tool(matched, call.arguments.clone()).await {
                Ok(value) => results.push(json!({ "tool_slug": call.tool_slug, "success": true, "output": value })),
                Err(e) => results.push(json!({ "tool_slug": call.tool_slug, "success": false, "output": e.to_string() })),
            }
        }

        let output = serde_json::to_string_pretty(&results).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(output).with_metadata(json!({ "results": results })))
    }

    /// Argument-dependent (some inner calls may be read-only, some not); the
    /// router falls back to its name heuristic per call slug, which cannot
    /// see inside `calls`, so this is conservatively always mutating.
    fn is_mutating(&self) -> Option<bool> {
        Some(true)
    }

    fn source(&self) -> ToolSource {
        ToolSource::Composio
    }
}

/// Lists, connects, or disconnects Composio account connections for a
/// toolkit (spec.md §4.4 step 7 "search connected accounts / manage
/// connections surfaces").
pub struct ComposioManageConnections {
    manager: Arc<McpManager>,
}

impl ComposioManageConnections {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ComposioManageConnections {
    fn name(&self) -> &str {
        "COMPOSIO_MANAGE_CONNECTIONS"
    }

    fn description(&self) -> &str {
        "Manage Composio account connections: action is one of list, status, connect, disconnect."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["list", "status", "check", "get", "connect", "disconnect"] },
                "toolkit": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or("missing required field 'action'")?;

        if self.manager.is_suspended(COMPOSIO_SERVER_KEY).await {
            return Ok(ToolResult::err(
                "Composio server is suspended pending schema-drift review",
            ));
        }

        let Some(transport) = self.manager.transport_for(COMPOSIO_SERVER_KEY).await else {
            return Ok(ToolResult::err("Composio server is not connected"));
        };

        match transport.call_tool("manage_connections", args.clone()).await {
            Ok(value) => {
                let output = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                Ok(ToolResult::ok(output).with_metadata(value))
            }
            Err(e) => Ok(ToolResult::err(format!("manage_connections({action}) failed: {e}"))),
        }
    }

    /// `list`/`status`/`check`/`get` only read connection state; `connect`/
    /// `disconnect` mutate it (spec.md §4.4 "mutating except for action in
    /// {list, status, check, get}"). `is_mutating` has no argument access, so
    /// this reports `None` and lets the router's name heuristic apply —
    /// callers that need the finer per-action distinction should check
    /// `action` themselves before calling.
    fn is_mutating(&self) -> Option<bool> {
        None
    }

    fn source(&self) -> ToolSource {
        ToolSource::Composio
    }
}

/// Lists which Composio toolkits currently have an active account
/// connection, without taking any action.
pub struct ComposioGetConnectedAccounts {
    manager: Arc<McpManager>,
}

impl ComposioGetConnectedAccounts {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ComposioGetConnectedAccounts {
    fn name(&self) -> &str {
        "COMPOSIO_GET_CONNECTED_ACCOUNTS"
    }

    fn description(&self) -> &str {
        "List Composio toolkits with an active account connection."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
        if self.manager.is_suspended(COMPOSIO_SERVER_KEY).await {
            return Ok(ToolResult::err(
                "Composio server is suspended pending schema-drift review",
            ));
        }

        let Some(transport) = self.manager.transport_for(COMPOSIO_SERVER_KEY).await else {
            return Ok(ToolResult::err("Composio server is not connected"));
        };

        match transport.call_tool("get_connected_accounts", json!({})).await {
            Ok(value) => {
                let output = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                Ok(ToolResult::ok(output).with_metadata(value))
            }
            Err(e) => Ok(ToolResult::err(e.to_string())),
        }
    }

    fn is_mutating(&self) -> Option<bool> {
        Some(false)
    }

    fn source(&self) -> ToolSource {
        ToolSource::Composio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_slug_normalizes_case_and_separators() {
        assert_eq!(canonicalize_slug("Gmail Send Email"), "gmail_send_email");
        assert_eq!(canonicalize_slug("gmail-send-email"), "gmail_send_email");
        assert_eq!(canonicalize_slug("GMAIL_SEND_EMAIL"), "gmail_send_email");
    }

    #[test]
    fn fuzzy_match_prefers_exact_canonical_match() {
        let candidates = vec!["GMAIL_SEND_EMAIL".to_string(), "GMAIL_CREATE_DRAFT".to_string()];
        assert_eq!(
            fuzzy_match_slug("gmail_send_email", &candidates),
            Some("GMAIL_SEND_EMAIL")
        );
    }

    #[test]
    fn fuzzy_match_tolerates_minor_slug_mangling() {
        let candidates = vec!["GMAIL_SEND_EMAIL".to_string(), "SLACK_POST_MESSAGE".to_string()];
        assert_eq!(
            fuzzy_match_slug("gmail-send_email ", &candidates),
            Some("GMAIL_SEND_EMAIL")
        );
    }

    #[test]
    fn fuzzy_match_returns_none_when_nothing_is_close() {
        let candidates = vec!["SLACK_POST_MESSAGE".to_string()];
        assert_eq!(fuzzy_match_slug("totally_unrelated_slug", &candidates), None);
    }
}
