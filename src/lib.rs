//! Castellan — an always-on Roam Research chief-of-staff agent (spec.md §1
//! OVERVIEW).
//!
//! This crate is headless: everything the host (the `castellan` CLI binary,
//! or any other embedder) needs is assembled by [`CoreContext::bootstrap`]
//! and driven through [`ask`]. Nothing here talks to a graph store directly
//! — `external::GraphAPI`/`UIHost` are the seams a host must supply.

pub mod agent;
pub mod ai;
pub mod config;
pub mod database;
pub mod event_bus;
pub mod external;
pub mod inbox;
pub mod logging;
pub mod mcp;
pub mod memory;
pub mod scheduler;
pub mod security;
pub mod tools;

use std::sync::Arc;

use crate::agent::failover::FailoverController;
use crate::agent::loop_::{AgentConfig, AgentLoop, AgentTurnInput, AgentTurnResult, AgentTurnState};
use crate::agent::skills::SkillRegistry;
use crate::agent::{SessionRouter, TurnContextBuilder};
use crate::ai::context::SectionContent;
use crate::ai::providers::build_provider_set;
use crate::config::AppConfig;
use crate::database::DbPool;
use crate::event_bus::{EventBus, TokioBroadcastBus};
use crate::external::GraphAPI;
use crate::inbox::InboxProcessor;
use crate::mcp::{
    ComposioGetConnectedAccounts, ComposioManageConnections, ComposioMultiExecuteTool, ComposioSearchTools,
    DirectMcpTool, McpExecuteTool, McpManager, McpRouteTool, ToolExposure,
};
use crate::memory::{register_memory_tools, InMemoryStore, Memory};
use crate::scheduler::TokioScheduler;
use crate::security::{AutonomyLevel, SecurityPolicy};
use crate::tools::{register_builtin_tools, ToolContext, ToolRegistry, ToolRouter};

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("database error: {0}")]
    Database(#[from] database::DbError),
}

/// Everything one running instance of the agent needs, wired together once
/// at startup and shared behind `Arc`s from then on (spec.md §9 glossary
/// "CoreContext").
pub struct CoreContext {
    pub config: AppConfig,
    pub pool: DbPool,
    pub events: Arc<dyn EventBus>,
    pub policy: Arc<SecurityPolicy>,
    pub tool_registry: Arc<ToolRegistry>,
    pub tool_router: Arc<ToolRouter>,
    pub failover: Arc<FailoverController>,
    pub scheduler: Arc<TokioScheduler>,
    pub session_router: Arc<SessionRouter>,
    pub skills: Arc<SkillRegistry>,
    pub memory: Arc<dyn Memory>,
    pub mcp: Arc<McpManager>,
    pub agent: Arc<AgentLoop>,
}

fn autonomy_from_config(level: &str) -> AutonomyLevel {
    match level {
        "readonly" => AutonomyLevel::ReadOnly,
        "autonomous" => AutonomyLevel::Full,
        _ => AutonomyLevel::Supervised,
    }
}

impl CoreContext {
    /// Boots the full stack: database + migrations, security policy, tool
    /// registry, provider failover chains, and MCP server connections
    /// (spec.md §4.5 "Connect" runs as part of boot, not lazily).
    pub async fn bootstrap(config: AppConfig, db_path: &std::path::Path) -> Result<Arc<Self>, BootError> {
        let pool = database::init(db_path)?;

        let events: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());

        let policy = Arc::new(SecurityPolicy::new(
            autonomy_from_config(&config.security.autonomy_level),
            config.security.workspace_root.clone().map(std::path::PathBuf::from),
            Vec::new(),
            3600,
            config.security.rate_limit_per_hour as usize,
        ));

        let session_router = Arc::new(SessionRouter::new());
        let skills = Arc::new(SkillRegistry::new());
        let memory: Arc<dyn Memory> = Arc::new(InMemoryStore::new_mock());

        // Built without an agent loop yet — `cos_cron_*` tool calls can
        // create/list/remove jobs from the first turn on, but the
        // background tick won't actually fire a job's prompt until the
        // host calls `wire_scheduler` once it has a `TurnContextBuilder`.
        let scheduler = TokioScheduler::new_with_persistence(events.clone(), Some(pool.clone()));

        let mut tool_registry = ToolRegistry::new();
        register_builtin_tools(
            &mut tool_registry,
            ToolContext {
                policy: policy.clone(),
                scheduler: Some(scheduler.clone() as Arc<dyn scheduler::Scheduler>),
                session_router: Some(session_router.clone()),
                max_cron_jobs: config.scheduler.max_cron_jobs,
            },
        );
        register_memory_tools(&mut tool_registry, memory.clone());

        let mcp = mcp::bootstrap(config.mcp.clone(), events.clone(), Some(&pool)).await;
        // Direct servers (spec.md §4.4 step 5) get each discovered tool
        // registered under its own name; routed servers (step 6) stay
        // behind the two meta-tools registered below for every server.
        for server_key in mcp.server_keys().await {
            if mcp.exposure_for(&server_key).await == Some(ToolExposure::Direct) {
                for tool in mcp.tools_for(&server_key).await {
                    tool_registry.register(Arc::new(DirectMcpTool::new(mcp.clone(), server_key.clone(), tool)));
                }
            }
        }
        tool_registry.register(Arc::new(McpRouteTool::new(mcp.clone())));
        tool_registry.register(Arc::new(McpExecuteTool::new(mcp.clone())));

        // Snapshot everything registered so far so `ComposioMultiExecuteTool`
        // can intercept a slug that matches a local tool and run it there
        // instead of over the Composio transport (spec.md §4.4 step 7).
        let base_registry = Arc::new(tool_registry);
        let mut tool_registry = ToolRegistry::new();
        for (_, tool) in base_registry.iter() {
            tool_registry.register(tool.clone());
        }
        if config.mcp.composio_url.is_some() {
            tool_registry.register(Arc::new(ComposioSearchTools::new(mcp.clone())));
            tool_registry.register(Arc::new(ComposioMultiExecuteTool::new(mcp.clone(), base_registry.clone())));
            tool_registry.register(Arc::new(ComposioManageConnections::new(mcp.clone())));
            tool_registry.register(Arc::new(ComposioGetConnectedAccounts::new(mcp.clone())));
        }

        let tool_registry = Arc::new(tool_registry);
        let tool_router = Arc::new(ToolRouter::new(tool_registry.clone(), policy.clone()));

        let providers = build_provider_set(&config.provider);
        let failover = Arc::new(FailoverController::new(providers, config.provider.clone()));

        let agent = Arc::new(AgentLoop::new(
            failover.clone(),
            tool_router.clone(),
            Some(events.clone()),
            AgentConfig {
                pii_scrub_enabled: config.security.pii_scrub_enabled,
                ..AgentConfig::default()
            },
        ));

        Ok(Arc::new(Self {
            config,
            pool,
            events,
            policy,
            tool_registry,
            tool_router,
            failover,
            scheduler,
            session_router,
            skills,
            memory,
            mcp,
            agent,
        }))
    }
}

/// Wires the agent loop into the scheduler and starts its tick loop (spec.md
/// §4.6). Until this runs, `cos_cron_*` tool calls still create/list/remove
/// jobs, but due jobs have no prompt to fire — this is why `bootstrap` builds
/// the scheduler without an agent and leaves this as a separate step: the
/// tool registry (and therefore `AgentLoop`) is assembled before the agent
/// exists, so the wiring has to happen after the fact.
pub async fn wire_scheduler(ctx: &CoreContext, context_builder: Arc<dyn TurnContextBuilder>) {
    ctx.scheduler.set_agent(ctx.agent.clone(), context_builder);
    ctx.scheduler.start().await;
}

/// [`TurnContextBuilder`] implementation backed by a live [`GraphAPI`],
/// used by both the chat-panel path and non-interactive callers (cron,
/// inbox) that need a fresh system-prompt snapshot (spec.md §4.3). A
/// concrete host fills in per-section graph pulls; this crate only pins
/// down the shape so the agent loop can be driven without a chat panel.
pub struct GraphContextBuilder {
    graph: Arc<dyn GraphAPI>,
    tool_schemas: Vec<ai::types::ToolSchema>,
}

impl GraphContextBuilder {
    pub fn new(graph: Arc<dyn GraphAPI>, tool_schemas: Vec<ai::types::ToolSchema>) -> Self {
        Self { graph, tool_schemas }
    }
}

#[async_trait::async_trait]
impl TurnContextBuilder for GraphContextBuilder {
    async fn build(&self, _user_message: &str) -> SectionContent {
        let _ = &self.graph;
        SectionContent::default()
    }

    fn tool_schemas(&self) -> Vec<ai::types::ToolSchema> {
        self.tool_schemas.clone()
    }
}

/// Runs one interactive chat-panel turn to completion (spec.md §4.1 "Turn
/// lifecycle"). `read_only` is always `false` here — the chat panel is the
/// one ingress that may mutate the graph.
pub async fn ask(
    ctx: &CoreContext,
    context_builder: &dyn TurnContextBuilder,
    turns: &[agent::ConversationTurn],
    user_message: &str,
) -> Result<String, agent::AgentLoopError> {
    let content = context_builder.build(user_message).await;
    let schemas = context_builder.tool_schemas();
    let input = AgentTurnInput {
        turns,
        user_message,
        page_changed_notice: None,
        section_content: &content,
        previous_sections: None,
        read_only: false,
        skill: None,
    };
    let mut state = AgentTurnState::default();
    match ctx.agent.run(input, &mut state, schemas).await? {
        AgentTurnResult::Completed(outcome) => Ok(outcome.response_text),
        AgentTurnResult::NeedsApproval { tool_name, .. } => {
            Ok(format!("Approval required before running '{tool_name}'."))
        }
    }
}

/// Bootstraps an [`InboxProcessor`] against a live [`GraphAPI`] and spawns
/// its processing loop (spec.md §4.7). Returns the processor handle so the
/// host can feed it pull-watch callbacks.
pub async fn spawn_inbox(
    ctx: &CoreContext,
    graph: Arc<dyn GraphAPI>,
    context_builder: Arc<dyn TurnContextBuilder>,
) -> Result<Arc<InboxProcessor>, String> {
    let processor = InboxProcessor::bootstrap(
        graph,
        ctx.agent.clone(),
        context_builder,
        ctx.events.clone(),
        ctx.config.inbox.clone(),
    )
    .await?;
    tokio::spawn(processor.clone().run_processing_loop());
    Ok(processor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomy_from_config_maps_known_levels() {
        assert_eq!(autonomy_from_config("readonly"), AutonomyLevel::ReadOnly);
        assert_eq!(autonomy_from_config("supervised"), AutonomyLevel::Supervised);
        assert_eq!(autonomy_from_config("autonomous"), AutonomyLevel::Full);
        assert_eq!(autonomy_from_config("bogus"), AutonomyLevel::Supervised);
    }
}
