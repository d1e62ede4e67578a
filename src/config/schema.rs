//! TOML configuration schema for Castellan.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.castellan/config.toml`:
//! ```toml
//! [security]
//! autonomy_level = "supervised"
//!
//! [scheduler]
//! heartbeat_interval_secs = 1800
//! cron_tick_interval_secs = 60
//!
//! [provider.mini]
//! chain = ["gemini", "mistral", "openai", "anthropic"]
//!
//! [mcp]
//! local_ports = [8100]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Model tiers ──────────────────────────────────────────────────────────────

/// Cost/capability tier used by the failover & escalation controller (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Mini,
    Power,
    Ludicrous,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Mini => "mini",
            ModelTier::Power => "power",
            ModelTier::Ludicrous => "ludicrous",
        }
    }
}

// ─── ProviderConfig ───────────────────────────────────────────────────────────

/// Per-tier provider chain, generalizing the donor's flat `default_id` /
/// `default_model` pair into the ordered chains §4.2 traverses on failover.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider chain for the `mini` tier, tried in order (e.g. `["gemini", "mistral", "openai", "anthropic"]`).
    pub mini_chain: Vec<String>,
    /// Provider chain for the `power` tier.
    pub power_chain: Vec<String>,
    /// Provider chain for the `ludicrous` tier (best-models-first), only consulted
    /// when `ludicrous_enabled` is true.
    pub ludicrous_chain: Vec<String>,
    /// Per-provider API key environment-variable name, e.g. `{"openai": "OPENAI_API_KEY"}`.
    pub api_key_env: HashMap<String, String>,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum retry attempts per provider on transient errors.
    pub max_retries: u32,
    /// Cool-down duration (seconds) applied to a provider after a failover-eligible error.
    pub cooldown_secs: u64,
    /// Daily spending cap in USD. Exceeding it returns a cap-notice response (§4.1 step 1).
    pub daily_cap_usd: f64,
    /// Whether the `ludicrous` tier may be escalated to.
    pub ludicrous_enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mini_chain: vec![
                "gemini".into(),
                "mistral".into(),
                "openai".into(),
                "anthropic".into(),
            ],
            power_chain: vec!["anthropic".into(), "openai".into(), "gemini".into()],
            ludicrous_chain: vec!["anthropic".into(), "openai".into()],
            api_key_env: HashMap::new(),
            request_timeout_secs: 90,
            max_retries: 3,
            cooldown_secs: 60,
            daily_cap_usd: 5.0,
            ludicrous_enabled: false,
        }
    }
}

impl ProviderConfig {
    /// Chain of provider ids for a given tier, in priority order.
    pub fn chain_for(&self, tier: ModelTier) -> &[String] {
        match tier {
            ModelTier::Mini => &self.mini_chain,
            ModelTier::Power => &self.power_chain,
            ModelTier::Ludicrous => &self.ludicrous_chain,
        }
    }
}

// ─── SecurityConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Autonomy level: `"readonly"`, `"supervised"`, or `"autonomous"`.
    pub autonomy_level: String,
    /// Optional workspace root path (restricts file tool access).
    pub workspace_root: Option<String>,
    /// Commands blocked regardless of autonomy level.
    pub blocked_commands: Vec<String>,
    /// Rate limit: max tool calls per minute.
    pub rate_limit_per_minute: u32,
    /// Rate limit: max tool calls per hour.
    pub rate_limit_per_hour: u32,
    /// One-shot dry-run flag: the next mutating call is simulated, not executed.
    pub dry_run_mode: bool,
    /// Whether outbound LLM payloads are additionally scrubbed for PII
    /// (credit cards, emails, phone numbers, SSNs, IBANs, IPs).
    pub pii_scrub_enabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            autonomy_level: "supervised".to_owned(),
            workspace_root: None,
            blocked_commands: Vec::new(),
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 600,
            dry_run_mode: false,
            pii_scrub_enabled: false,
        }
    }
}

// ─── ContextConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    /// Approximate message-character budget enforced before every LLM call (§3, §4.3).
    pub message_budget_chars: usize,
    /// Maximum stored conversation turns (§3 MAX_TURNS).
    pub max_turns: usize,
    /// Minimum chars a single tool result is truncated down to.
    pub min_tool_result_chars: usize,
    /// Section cache TTL in seconds (memory/skills/projects sections, §4.3).
    pub section_cache_ttl_secs: u64,
    /// Per-role storage caps: user text / assistant text (§3).
    pub user_text_cap_chars: usize,
    pub assistant_text_cap_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            message_budget_chars: 50_000,
            max_turns: 12,
            min_tool_result_chars: 300,
            section_cache_ttl_secs: 300,
            user_text_cap_chars: 500,
            assistant_text_cap_chars: 2000,
        }
    }
}

// ─── SchedulerConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Heartbeat interval in seconds (default: 30 minutes).
    pub heartbeat_interval_secs: u64,
    /// Whether the heartbeat scheduler is enabled.
    pub heartbeat_enabled: bool,
    /// Cron/interval tick loop interval in seconds (§4.6, default 60s).
    pub cron_tick_interval_secs: u64,
    /// Leader heartbeat interval in seconds (§4.6, default 30s).
    pub leader_heartbeat_secs: u64,
    /// A leader record older than this is considered stale and claimable (§4.6, default 90s).
    pub leader_stale_secs: u64,
    /// Maximum number of persisted cron jobs (§3, default 20).
    pub max_cron_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30 * 60,
            heartbeat_enabled: true,
            cron_tick_interval_secs: 60,
            leader_heartbeat_secs: 30,
            leader_stale_secs: 90,
            max_cron_jobs: 20,
        }
    }
}

// ─── McpConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpConfig {
    /// Local MCP server ports (spawned as subprocess or SSE-polled, §4.5).
    pub local_ports: Vec<u16>,
    /// Remote MCP server URLs (streamable HTTP).
    pub remote_urls: Vec<String>,
    /// Connect timeout in seconds (§4.5, default 30s).
    pub connect_timeout_secs: u64,
    /// `tools/list` timeout in seconds (§4.5, default 5s).
    pub list_tools_timeout_secs: u64,
    /// Back-off base in seconds (§4.5: `min(2^N * base, cap)`).
    pub backoff_base_secs: u64,
    /// Back-off cap in seconds (§4.5, default 60s).
    pub backoff_cap_secs: u64,
    /// Tool-count threshold above which a server is classified "routed" instead
    /// of "direct" (§4.4/§4.5, default 15).
    pub direct_tool_count_threshold: usize,
    /// Maximum connect retries on auto-connect at startup.
    pub max_connect_retries: u32,
    /// The Composio MCP server's URL, if configured (§6 settings key
    /// "Composio MCP URL"). Connected like any other remote server, but its
    /// server key is known so the four Composio meta-tools can be wired
    /// against it specifically.
    pub composio_url: Option<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            local_ports: Vec::new(),
            remote_urls: Vec::new(),
            connect_timeout_secs: 30,
            list_tools_timeout_secs: 5,
            backoff_base_secs: 2,
            backoff_cap_secs: 60,
            direct_tool_count_threshold: 15,
            max_connect_retries: 5,
            composio_url: None,
        }
    }
}

// ─── InboxConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InboxConfig {
    /// Pull-watch poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Full-scan fallback cool-down in seconds (§4.7, default 60s).
    pub full_scan_cooldown_secs: u64,
    /// Pending queue capacity before backpressure drops new candidates (§4.7, default 40).
    pub queue_capacity: usize,
    /// Debounce applied before a detected change is queued (§4.7 scenario 6, default 5s).
    pub debounce_secs: u64,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            full_scan_cooldown_secs: 60,
            queue_capacity: 40,
            debounce_secs: 5,
        }
    }
}

// ─── MemoryConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Whether the memory subsystem is enabled.
    pub enabled: bool,
    /// LRU cache size for embeddings.
    pub embedding_cache_size: usize,
    /// Maximum number of entries returned by recall.
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            embedding_cache_size: 10_000,
            recall_limit: 10,
        }
    }
}

// ─── NotificationsConfig ──────────────────────────────────────────────────────

fn default_dnd_start() -> u8 {
    22 // 10 pm
}

fn default_dnd_end() -> u8 {
    7 // 7 am
}

fn bool_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Whether desktop/toast notifications are enabled globally.
    pub enabled: bool,
    /// Global Do Not Disturb mode (boolean toggle, env-var controlled).
    pub do_not_disturb: bool,
    /// When `true`, the DND time-window is enforced. Default `false` (opt-in).
    pub dnd_schedule_enabled: bool,
    /// DND window start hour (0-23), inclusive. Default 22 (10 pm).
    #[serde(default = "default_dnd_start")]
    pub dnd_start_hour: u8,
    /// DND window end hour (0-23), exclusive. Default 7 (7 am).
    #[serde(default = "default_dnd_end")]
    pub dnd_end_hour: u8,
    /// Per-category enable flags (category name -> enabled).
    pub categories: HashMap<String, bool>,
    /// Notify on heartbeat ticks.
    #[serde(default = "bool_true")]
    pub notify_heartbeat: bool,
    /// Notify when a cron job fires.
    #[serde(default = "bool_true")]
    pub notify_cron_reminder: bool,
    /// Notify when an agent task completes.
    #[serde(default = "bool_true")]
    pub notify_agent_complete: bool,
    /// Notify when an approval is requested.
    #[serde(default = "bool_true")]
    pub notify_approval_request: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            do_not_disturb: false,
            dnd_schedule_enabled: false,
            dnd_start_hour: default_dnd_start(),
            dnd_end_hour: default_dnd_end(),
            categories: HashMap::new(),
            notify_heartbeat: true,
            notify_cron_reminder: true,
            notify_agent_complete: true,
            notify_approval_request: true,
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.castellan/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub security: SecurityConfig,
    pub context: ContextConfig,
    pub scheduler: SchedulerConfig,
    pub mcp: McpConfig,
    pub inbox: InboxConfig,
    pub memory: MemoryConfig,
    pub notifications: NotificationsConfig,
    /// Days of retention for the in-memory audit log before pruning (§6 settings keys).
    #[serde(default = "default_audit_retention")]
    pub audit_log_retention_days: u32,
}

fn default_audit_retention() -> u32 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            security: SecurityConfig::default(),
            context: ContextConfig::default(),
            scheduler: SchedulerConfig::default(),
            mcp: McpConfig::default(),
            inbox: InboxConfig::default(),
            memory: MemoryConfig::default(),
            notifications: NotificationsConfig::default(),
            audit_log_retention_days: default_audit_retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = AppConfig::default();
        let toml_str = toml::to_string(&cfg).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let partial = "[security]\nautonomy_level = \"autonomous\"\n";
        let cfg: AppConfig = toml::from_str(partial).expect("deserialize partial");
        assert_eq!(cfg.security.autonomy_level, "autonomous");
        assert_eq!(cfg.scheduler.cron_tick_interval_secs, 60);
        assert_eq!(cfg.audit_log_retention_days, 30);
    }

    #[test]
    fn provider_chain_for_each_tier() {
        let cfg = ProviderConfig::default();
        assert_eq!(cfg.chain_for(ModelTier::Mini), cfg.mini_chain.as_slice());
        assert_eq!(cfg.chain_for(ModelTier::Power), cfg.power_chain.as_slice());
        assert_eq!(
            cfg.chain_for(ModelTier::Ludicrous),
            cfg.ludicrous_chain.as_slice()
        );
    }
}
