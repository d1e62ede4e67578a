use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a tool's implementation actually lives (spec.md §9 `ToolSource`).
///
/// The router consults this to decide which layer of the resolution order
/// (native registry, installed extension, direct/routed MCP, Composio,
/// or the assistant's own synthesized answer) produced a given [`ToolInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// Built into this crate (shell, file ops, cron, ...).
    Native,
    /// Installed via an extension manifest, same process.
    Extension,
    /// Backed by an MCP server whose tool count is under the direct threshold.
    MCPDirect,
    /// Backed by an MCP server whose tools are hidden behind `LOCAL_MCP_ROUTE`/`LOCAL_MCP_EXECUTE`.
    MCPRouted,
    /// A Composio meta-tool (slug-addressed, argument-rescued).
    Composio,
    /// Not a callable tool at all — the assistant answered directly.
    Assistant,
}

impl Default for ToolSource {
    fn default() -> Self {
        ToolSource::Native
    }
}

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Human-readable output (stdout, file contents, directory listing, etc.).
    pub output: String,
    /// Whether the tool considered the execution successful.
    pub success: bool,
    /// Optional structured metadata for machine consumption.
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            metadata: None,
        }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A capability that the agent loop can invoke.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"shell"`.
    fn name(&self) -> &str;

    /// Human-readable description used in LLM `tool_use` payloads.
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments (validated against the schema
    /// by the caller when invoking from the agent loop).
    async fn execute(&self, args: Value) -> Result<ToolResult, String>;

    /// Whether this tool is known to mutate external state.
    ///
    /// `None` means "unknown" — the router falls back to its name-heuristic
    /// (spec.md §4.4 "A tool is 'potentially mutating' iff ..."). Tools that
    /// know their own nature (e.g. a read-only search tool) should override
    /// this instead of relying on name matching.
    fn is_mutating(&self) -> Option<bool> {
        None
    }

    /// Where this tool's implementation lives. Defaults to [`ToolSource::Native`]
    /// since every hand-written `Tool` impl in this crate is native; MCP/Composio
    /// adapters override it.
    fn source(&self) -> ToolSource {
        ToolSource::Native
    }
}

/// Summary of a registered tool, suitable for inclusion in LLM API requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub schema: Value,
    #[serde(default)]
    pub is_mutating: Option<bool>,
    #[serde(default)]
    pub source: ToolSource,
}
