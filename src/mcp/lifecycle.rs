//! Connect / retry / classify lifecycle for MCP servers (spec.md §4.5).
//!
//! One [`McpManager`] tracks every configured server: its connection state,
//! the schema pin from its last successful handshake, whether it's in the
//! in-memory suspension set, and whether its tool count puts it in direct
//! (tools registered individually) or routed (hidden behind the two meta
//! tools) mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::schema::McpConfig;
use crate::event_bus::{AppEvent, EventBus};

use super::pin::{check_pin, DiscoveredTool, PinCheck, SchemaPin, Suspension};
use super::transport::{McpTransport, TransportError};

/// Whether a connected server's tools are registered directly in the
/// registry or hidden behind the routing meta-tools (spec.md §4.4/§4.5:
/// "direct (<= 15 tools) or routed (> 15)" — a server with exactly the
/// threshold count is direct).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolExposure {
    Direct,
    Routed,
}

pub fn classify_exposure(tool_count: usize, threshold: usize) -> ToolExposure {
    if tool_count > threshold {
        ToolExposure::Routed
    } else {
        ToolExposure::Direct
    }
}

/// Computes the retry backoff for the Nth consecutive failure (spec.md §4.5
/// "back off: `min(2^N * base, cap)` seconds").
pub fn backoff_for_attempt(attempt: u32, base_secs: u64, cap_secs: u64) -> Duration {
    let scaled = 2u64.saturating_pow(attempt).saturating_mul(base_secs);
    Duration::from_secs(scaled.min(cap_secs))
}

#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connected {
        tool_count: usize,
        exposure: ToolExposure,
    },
    Suspended {
        suspension: Box<Suspension>,
    },
    Failed {
        consecutive_failures: u32,
        next_retry_at: Instant,
        last_error: String,
    },
}

struct ServerEntry {
    transport: Option<Arc<dyn McpTransport>>,
    tools: Vec<DiscoveredTool>,
    pin: Option<SchemaPin>,
    state: ConnectionState,
}

/// Runtime registry of MCP servers, keyed by server name (spec.md glossary
/// "server key").
pub struct McpManager {
    config: McpConfig,
    entries: RwLock<HashMap<String, ServerEntry>>,
    events: Arc<dyn EventBus>,
}

impl McpManager {
    pub fn new(config: McpConfig, events: Arc<dyn EventBus>) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Seeds a pin loaded from persistence before the first connect attempt
    /// of this process, so that attempt's pin check compares against the
    /// last known-good schema rather than treating it as brand new.
    pub async fn seed_pin(&self, server_key: &str, pin: SchemaPin) {
        let mut entries = self.entries.write().await;
        entries.insert(
            server_key.to_string(),
            ServerEntry {
                transport: None,
                tools: Vec::new(),
                pin: Some(pin),
                state: ConnectionState::Disconnected,
            },
        );
    }

    pub async fn pin_for(&self, server_key: &str) -> Option<SchemaPin> {
        self.entries.read().await.get(server_key).and_then(|e| e.pin.clone())
    }

    /// Runs the connect sequence for one server against a live transport
    /// (spec.md §4.5 "Connect" step list): list tools, check the pin,
    /// suspend on drift, otherwise record the pin and classify exposure.
    #[tracing::instrument(skip_all, fields(server_key = %server_key))]
    pub async fn connect(
        &self,
        server_key: &str,
        transport: Arc<dyn McpTransport>,
    ) -> Result<ConnectionState, TransportError> {
        let tools = tokio::time::timeout(
            Duration::from_secs(self.config.list_tools_timeout_secs),
            transport.list_tools(),
        )
        .await
        .map_err(|_| TransportError::Timeout(Duration::from_secs(self.config.list_tools_timeout_secs)))??;

        let existing_pin = {
            let entries = self.entries.read().await;
            entries.get(server_key).and_then(|e| e.pin.clone())
        };

        let check = check_pin(existing_pin.as_ref(), &tools);
        let tool_count = tools.len();
        let exposure = classify_exposure(tool_count, self.config.direct_tool_count_threshold);

        let (state, pin) = match check {
            PinCheck::FirstConnection { pin } => (
                ConnectionState::Connected { tool_count, exposure },
                Some(pin),
            ),
            PinCheck::Unchanged => {
                let pin = existing_pin.clone();
                (ConnectionState::Connected { tool_count, exposure }, pin)
            }
            PinCheck::Drifted { new_pin, added, removed, modified } => {
                let suspension = Suspension::from_drift(
                    server_key,
                    &new_pin,
                    added,
                    removed,
                    modified,
                    now_ms(),
                );
                let _ = self.events.publish(AppEvent::SchemaDrift {
                    server_key: server_key.to_string(),
                    summary: suspension.summary.clone(),
                });
                let _ = self.events.publish(AppEvent::McpSuspended {
                    server_key: server_key.to_string(),
                    suspended: true,
                });
                (
                    ConnectionState::Suspended { suspension: Box::new(suspension) },
                    Some(new_pin),
                )
            }
        };

        let mut entries = self.entries.write().await;
        entries.insert(
            server_key.to_string(),
            ServerEntry {
                transport: Some(transport),
                tools,
                pin,
                state: state.clone(),
            },
        );
        Ok(state)
    }

    /// Records a failed connect attempt, advancing the server into (or
    /// deeper into) backed-off retry state.
    pub async fn record_failure(&self, server_key: &str, error: &str) -> Duration {
        let mut entries = self.entries.write().await;
        let attempt = match entries.get(server_key).map(|e| &e.state) {
            Some(ConnectionState::Failed { consecutive_failures, .. }) => consecutive_failures + 1,
            _ => 1,
        };
        let delay = backoff_for_attempt(
            attempt,
            self.config.backoff_base_secs,
            self.config.backoff_cap_secs,
        );
        entries.insert(
            server_key.to_string(),
            ServerEntry {
                transport: None,
                tools: Vec::new(),
                pin: entries.get(server_key).and_then(|e| e.pin.clone()),
                state: ConnectionState::Failed {
                    consecutive_failures: attempt,
                    next_retry_at: Instant::now() + delay,
                    last_error: error.to_string(),
                },
            },
        );
        delay
    }

    /// Whether `server_key`'s backoff window has elapsed and a retry may run.
    pub async fn ready_to_retry(&self, server_key: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(server_key).map(|e| &e.state) {
            Some(ConnectionState::Failed { next_retry_at, .. }) => Instant::now() >= *next_retry_at,
            _ => true,
        }
    }

    pub async fn is_suspended(&self, server_key: &str) -> bool {
        let entries = self.entries.read().await;
        matches!(
            entries.get(server_key).map(|e| &e.state),
            Some(ConnectionState::Suspended { .. })
        )
    }

    /// Clears a server's suspension after human review accepts the new
    /// schema (spec.md §3 "In-memory only; cleared on accept or manual
    /// review").
    pub async fn accept_drift(&self, server_key: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(server_key) {
            if let ConnectionState::Suspended { .. } = entry.state {
                let tool_count = entry.tools.len();
                let exposure = classify_exposure(tool_count, self.config.direct_tool_count_threshold);
                entry.state = ConnectionState::Connected { tool_count, exposure };
                let _ = self.events.publish(AppEvent::McpSuspended {
                    server_key: server_key.to_string(),
                    suspended: false,
                });
            }
        }
    }

    pub async fn tools_for(&self, server_key: &str) -> Vec<DiscoveredTool> {
        let entries = self.entries.read().await;
        entries
            .get(server_key)
            .map(|e| e.tools.clone())
            .unwrap_or_default()
    }

    pub async fn transport_for(&self, server_key: &str) -> Option<Arc<dyn McpTransport>> {
        let entries = self.entries.read().await;
        entries.get(server_key).and_then(|e| e.transport.clone())
    }

    pub async fn server_keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn exposure_for(&self, server_key: &str) -> Option<ToolExposure> {
        let entries = self.entries.read().await;
        match entries.get(server_key).map(|e| &e.state) {
            Some(ConnectionState::Connected { exposure, .. }) => Some(*exposure),
            _ => None,
        }
    }
}

fn now_ms() -> i64 {
    // `lifecycle.rs` stamps suspension timestamps off wall-clock time read
    // at the moment of drift detection, not from any replayable state.
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_threshold_boundary() {
        assert_eq!(classify_exposure(14, 15), ToolExposure::Direct);
        assert_eq!(classify_exposure(15, 15), ToolExposure::Direct);
        assert_eq!(classify_exposure(16, 15), ToolExposure::Routed);
        assert_eq!(classify_exposure(30, 15), ToolExposure::Routed);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_for_attempt(0, 2, 60), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(1, 2, 60), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(2, 2, 60), Duration::from_secs(8));
        assert_eq!(backoff_for_attempt(10, 2, 60), Duration::from_secs(60));
    }
}
