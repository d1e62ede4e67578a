//! `LOCAL_MCP_ROUTE` and `LOCAL_MCP_EXECUTE`, the two meta-tools a routed
//! server's tools are hidden behind (spec.md §4.4/§4.5: "tool count >=
//! threshold -> routed; the model sees two meta tools instead of N").

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::traits::{Tool, ToolResult, ToolSource};

use super::lifecycle::McpManager;
use super::pin::DiscoveredTool;

/// Lets the model search a routed server's tool catalogue by keyword before
/// committing to a call (spec.md §4.5 "route: search the server's tool
/// descriptions for a keyword match").
pub struct McpRouteTool {
    manager: Arc<McpManager>,
}

impl McpRouteTool {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for McpRouteTool {
    fn name(&self) -> &str {
        "LOCAL_MCP_ROUTE"
    }

    fn description(&self) -> &str {
        "Search the tool catalogue of a routed MCP server by keyword. Returns matching tool names and descriptions; call LOCAL_MCP_EXECUTE with the chosen name to invoke one."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "server": { "type": "string", "description": "Server key to search" },
                "query": { "type": "string", "description": "Keyword to match against tool names and descriptions" }
            },
            "required": ["server", "query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let server = args
            .get("server")
            .and_then(|v| v.as_str())
            .ok_or("missing required field 'server'")?;
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or("missing required field 'query'")?
            .to_lowercase();

        if self.manager.is_suspended(server).await {
            return Ok(ToolResult::err(format!(
                "server '{server}' is suspended pending schema-drift review"
            )));
        }

        let tools = self.manager.tools_for(server).await;
        let matches: Vec<_> = tools
            .iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&query) || t.description.to_lowercase().contains(&query)
            })
            .map(|t| json!({ "name": t.name, "description": t.description }))
            .collect();

        if matches.is_empty() {
            return Ok(ToolResult::ok(format!(
                "no tools on '{server}' match '{query}'"
            )));
        }

        let output = serde_json::to_string_pretty(&matches).map_err(|e| e.to_string())?;
        Ok(ToolResult::ok(output).with_metadata(json!({ "matches": matches })))
    }

    fn is_mutating(&self) -> Option<bool> {
        Some(false)
    }

    fn source(&self) -> ToolSource {
        ToolSource::MCPRouted
    }
}

/// Invokes a named tool on a routed server (spec.md §4.5 "execute: call the
/// named tool on the named server with the given arguments").
pub struct McpExecuteTool {
    manager: Arc<McpManager>,
}

impl McpExecuteTool {
    pub fn new(manager: Arc<McpManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for McpExecuteTool {
    fn name(&self) -> &str {
        "LOCAL_MCP_EXECUTE"
    }

    fn description(&self) -> &str {
        "Invoke a named tool on a routed MCP server, found via LOCAL_MCP_ROUTE."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "server": { "type": "string" },
                "tool": { "type": "string" },
                "arguments": { "type": "object" }
            },
            "required": ["server", "tool"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let server = args
            .get("server")
            .and_then(|v| v.as_str())
            .ok_or("missing required field 'server'")?;
        let tool_name = args
            .get("tool")
            .and_then(|v| v.as_str())
            .ok_or("missing required field 'tool'")?;
        let tool_args = args.get("arguments").cloned().unwrap_or_else(|| json!({}));

        if self.manager.is_suspended(server).await {
            return Ok(ToolResult::err(format!(
                "server '{server}' is suspended pending schema-drift review"
            )));
        }

        let Some(transport) = self.manager.transport_for(server).await else {
            return Ok(ToolResult::err(format!("server '{server}' is not connected")));
        };

        match transport.call_tool(tool_name, tool_args).await {
            Ok(value) => {
                let output = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                Ok(ToolResult::ok(output).with_metadata(value))
            }
            Err(e) => Ok(ToolResult::err(e.to_string())),
        }
    }

    /// Routed calls are opaque by construction — the mutation heuristic
    /// falls back to the router's name-based classification of `tool`.
    fn is_mutating(&self) -> Option<bool> {
        None
    }

    fn source(&self) -> ToolSource {
        ToolSource::MCPRouted
    }
}

/// One tool of a "direct" MCP server (tool count <= the configured
/// threshold), registered under its own name so the router can resolve it
/// exactly like a native tool (spec.md §4.4 tool resolution order, step 5:
/// "MCP direct tools").
pub struct DirectMcpTool {
    manager: Arc<McpManager>,
    server_key: String,
    tool: DiscoveredTool,
}

impl DirectMcpTool {
    pub fn new(manager: Arc<McpManager>, server_key: String, tool: DiscoveredTool) -> Self {
        Self {
            manager,
            server_key,
            tool,
        }
    }
}

#[async_trait]
impl Tool for DirectMcpTool {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn parameters_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .tool
            .params
            .iter()
            .map(|(key, ty)| (key.clone(), json!({ "type": ty })))
            .collect();
        json!({ "type": "object", "properties": Value::Object(properties) })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        if self.manager.is_suspended(&self.server_key).await {
            return Ok(ToolResult::err(format!(
                "server '{}' is suspended pending schema-drift review",
                self.server_key
            )));
        }

        let Some(transport) = self.manager.transport_for(&self.server_key).await else {
            return Ok(ToolResult::err(format!(
                "server '{}' is not connected",
                self.server_key
            )));
        };

        match transport.call_tool(&self.tool.name, args).await {
            Ok(value) => {
                let output = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                Ok(ToolResult::ok(output).with_metadata(value))
            }
            Err(e) => Ok(ToolResult::err(e.to_string())),
        }
    }

    fn is_mutating(&self) -> Option<bool> {
        self.tool.is_mutating
    }

    fn source(&self) -> ToolSource {
        ToolSource::MCPDirect
    }
}
