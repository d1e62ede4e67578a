//! MCP server lifecycle: connect, schema-pin, classify, and route (spec.md
//! §4.5, §3 "Schema pin" / "Suspension entry").
//!
//! [`McpManager`] is the stateful core; [`meta_tools`] exposes the two tools
//! a "routed" server's catalogue hides behind; [`persistence`] durably
//! stores pins across restarts; [`transport`] adapts `rmcp` (and, for
//! remote servers, a plain JSON-RPC-over-HTTP client) to one trait.

pub mod composio;
pub mod lifecycle;
pub mod meta_tools;
pub mod persistence;
pub mod pin;
pub mod transport;

pub use composio::{
    ComposioGetConnectedAccounts, ComposioManageConnections, ComposioMultiExecuteTool, ComposioSearchTools,
};
pub use lifecycle::{ConnectionState, McpManager, ToolExposure};
pub use meta_tools::{DirectMcpTool, McpExecuteTool, McpRouteTool};
pub use pin::{DiscoveredTool, ModifiedTool, PinCheck, SchemaPin, Suspension, ToolFingerprint};
pub use transport::{HttpTransport, McpTransport, SseTransport, TransportError};

use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::McpConfig;
use crate::database::DbPool;
use crate::event_bus::EventBus;

/// Server keys are derived from their config position since `McpConfig`
/// only carries bare ports/URLs (spec.md §3 glossary "server key"): a local
/// port becomes `local:<port>`, a remote URL its own string.
pub fn server_key_for_local_port(port: u16) -> String {
    format!("local:{port}")
}

/// Fixed server key for the configured Composio MCP endpoint, so the
/// Composio meta-tools (`COMPOSIO_SEARCH_TOOLS` and friends) can find it
/// without guessing which remote URL is Composio's.
pub const COMPOSIO_SERVER_KEY: &str = "composio";

/// Builds an [`McpManager`] seeded with any pins persisted from a previous
/// run, then attempts to connect every server named in `config`, retrying
/// failed connects up to `config.max_connect_retries` times with the
/// configured backoff (spec.md §4.5 "Connect" / "Retry").
pub async fn bootstrap(
    config: McpConfig,
    events: Arc<dyn EventBus>,
    pool: Option<&DbPool>,
) -> Arc<McpManager> {
    let manager = Arc::new(McpManager::new(config.clone(), events));

    if let Some(pool) = pool {
        let pins = persistence::load_all(pool);
        for (server_key, pin) in pins {
            manager.seed_pin(&server_key, pin).await;
        }
    }

    let mut targets: Vec<(String, ServerAddress)> = Vec::new();
    for port in &config.local_ports {
        targets.push((
            server_key_for_local_port(*port),
            ServerAddress::LocalSse(format!("http://127.0.0.1:{port}/sse")),
        ));
    }
    for url in &config.remote_urls {
        targets.push((url.clone(), ServerAddress::RemoteHttp(url.clone())));
    }
    if let Some(url) = &config.composio_url {
        targets.push((COMPOSIO_SERVER_KEY.to_string(), ServerAddress::RemoteHttp(url.clone())));
    }

    for (server_key, address) in targets {
        connect_with_retry(&manager, &server_key, &address, &config, pool).await;
    }

    manager
}

enum ServerAddress {
    LocalSse(String),
    RemoteHttp(String),
}

async fn connect_with_retry(
    manager: &Arc<McpManager>,
    server_key: &str,
    address: &ServerAddress,
    config: &McpConfig,
    pool: Option<&DbPool>,
) {
    for attempt in 0..=config.max_connect_retries {
        let connect_result = match address {
            ServerAddress::LocalSse(url) => {
                SseTransport::connect(url)
                    .await
                    .map(|t| Arc::new(t) as Arc<dyn McpTransport>)
            }
            ServerAddress::RemoteHttp(url) => Ok(Arc::new(HttpTransport::new(
                url.clone(),
                Duration::from_secs(config.connect_timeout_secs),
            )) as Arc<dyn McpTransport>),
        };

        let transport = match connect_result {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(server_key, attempt, error = %e, "mcp connect failed");
                let delay = manager.record_failure(server_key, &e.to_string()).await;
                if attempt < config.max_connect_retries {
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return;
            }
        };

        match manager.connect(server_key, transport).await {
            Ok(state) => {
                if let (Some(pool), ConnectionState::Connected { .. } | ConnectionState::Suspended { .. }) =
                    (pool, &state)
                {
                    if let Some(pin) = manager.pin_for(server_key).await {
                        persistence::save(pool, server_key, &pin, now_ms());
                    }
                }
                return;
            }
            Err(e) => {
                tracing::warn!(server_key, attempt, error = %e, "mcp tools/list failed");
                let delay = manager.record_failure(server_key, &e.to_string()).await;
                if attempt < config.max_connect_retries {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
