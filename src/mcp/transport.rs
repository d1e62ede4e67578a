//! Transport adapters over `rmcp`, behind a narrow trait the lifecycle
//! manager drives (spec.md §4.5 "Connect").
//!
//! Local servers already listening on a port are reached over SSE; local
//! servers configured by command are spawned as a child process and spoken
//! to over stdio; remote servers use the streamable-HTTP client. All three
//! collapse to the same `McpTransport` surface so the retry/backoff state
//! machine in `lifecycle.rs` never needs to know which one it holds.

use async_trait::async_trait;
use serde_json::Value;

use super::pin::DiscoveredTool;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tools/list failed: {0}")]
    ListTools(String),
    #[error("tool call failed: {0}")]
    CallTool(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TransportError>;
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, TransportError>;
    async fn close(&self);
}

/// Minimal client-side handler: no sampling, no roots, no elicitation.
/// These servers are tool providers only, so every `rmcp::ClientHandler`
/// callback keeps its default no-op implementation.
#[derive(Debug, Clone, Default)]
pub struct NullClientHandler;

impl rmcp::ClientHandler for NullClientHandler {}

fn flatten_schema_params(schema: &Value) -> Vec<(String, String)> {
    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };
    props
        .iter()
        .map(|(key, value)| {
            let ty = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown")
                .to_string();
            (key.clone(), ty)
        })
        .collect()
}

/// Child-process (stdio) transport for locally spawned MCP servers
/// (spec.md §4.5 "local server not already listening -> spawn the
/// configured command").
pub struct ChildProcessTransport {
    peer: tokio::sync::Mutex<rmcp::service::RunningService<rmcp::RoleClient, NullClientHandler>>,
}

impl ChildProcessTransport {
    pub async fn spawn(command: &str, args: &[String]) -> Result<Self, TransportError> {
        use rmcp::transport::TokioChildProcess;
        use rmcp::ServiceExt;

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let peer = NullClientHandler
            .serve(transport)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self {
            peer: tokio::sync::Mutex::new(peer),
        })
    }
}

#[async_trait]
impl McpTransport for ChildProcessTransport {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TransportError> {
        let peer = self.peer.lock().await;
        let result = peer
            .list_tools(Default::default())
            .await
            .map_err(|e| TransportError::ListTools(e.to_string()))?;
        Ok(result
            .tools
            .into_iter()
            .map(|t| {
                let schema = Value::Object((*t.input_schema).clone());
                DiscoveredTool {
                    name: t.name.to_string(),
                    description: t.description.unwrap_or_default().to_string(),
                    params: flatten_schema_params(&schema),
                    is_mutating: None,
                }
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, TransportError> {
        let peer = self.peer.lock().await;
        let arguments = args.as_object().cloned();
        let result = peer
            .call_tool(rmcp::model::CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| TransportError::CallTool(e.to_string()))?;
        serde_json::to_value(result.content).map_err(|e| TransportError::CallTool(e.to_string()))
    }

    async fn close(&self) {
        let mut peer = self.peer.lock().await;
        let _ = peer.cancel().await;
    }
}

/// SSE transport for a local server that's already listening on a port
/// (spec.md §4.5 "already listening -> connect directly").
pub struct SseTransport {
    peer: tokio::sync::Mutex<rmcp::service::RunningService<rmcp::RoleClient, NullClientHandler>>,
}

impl SseTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        use rmcp::transport::sse_client::SseClientTransport;
        use rmcp::ServiceExt;

        let transport = SseClientTransport::start(url.to_string())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let peer = NullClientHandler
            .serve(transport)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self {
            peer: tokio::sync::Mutex::new(peer),
        })
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TransportError> {
        let peer = self.peer.lock().await;
        let result = peer
            .list_tools(Default::default())
            .await
            .map_err(|e| TransportError::ListTools(e.to_string()))?;
        Ok(result
            .tools
            .into_iter()
            .map(|t| {
                let schema = Value::Object((*t.input_schema).clone());
                DiscoveredTool {
                    name: t.name.to_string(),
                    description: t.description.unwrap_or_default().to_string(),
                    params: flatten_schema_params(&schema),
                    is_mutating: None,
                }
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, TransportError> {
        let peer = self.peer.lock().await;
        let arguments = args.as_object().cloned();
        let result = peer
            .call_tool(rmcp::model::CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| TransportError::CallTool(e.to_string()))?;
        serde_json::to_value(result.content).map_err(|e| TransportError::CallTool(e.to_string()))
    }

    async fn close(&self) {
        let mut peer = self.peer.lock().await;
        let _ = peer.cancel().await;
    }
}

/// Streamable-HTTP transport for remote MCP servers (spec.md §4.5 "remote
/// server -> streamable HTTP").
///
/// `rmcp`'s streamable-HTTP client transport isn't in this crate's enabled
/// feature set (only `transport-sse-client` and `transport-child-process`
/// are); remote servers are reached over plain HTTP JSON-RPC via `reqwest`
/// instead, speaking the same `tools/list` / `tools/call` methods.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    request_id: std::sync::atomic::AtomicU64,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            request_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self
            .request_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if let Some(error) = parsed.get("error") {
            return Err(TransportError::CallTool(error.to_string()));
        }
        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TransportError> {
        let result = self
            .rpc("tools/list", Value::Object(Default::default()))
            .await
            .map_err(|e| TransportError::ListTools(e.to_string()))?;
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(tools
            .into_iter()
            .map(|t| {
                let schema = t.get("inputSchema").cloned().unwrap_or(Value::Null);
                DiscoveredTool {
                    name: t.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string(),
                    description: t
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or("")
                        .to_string(),
                    params: flatten_schema_params(&schema),
                    is_mutating: None,
                }
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, TransportError> {
        self.rpc(
            "tools/call",
            serde_json::json!({ "name": name, "arguments": args }),
        )
        .await
    }

    async fn close(&self) {}
}
