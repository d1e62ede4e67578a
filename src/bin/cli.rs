//! `castellan` — the headless CLI front-end for the chief-of-staff agent
//! (SPEC_FULL.md §11 "Supplemental capabilities").
//!
//! This binary only drives the subset of [`castellan::CoreContext`] that
//! makes sense without a live graph host: direct chat turns against
//! whatever `SectionContent` the caller supplies, cron CRUD, MCP connection
//! inspection, and the cost/usage tables.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use diesel::prelude::*;

use castellan::config::{load_config, load_default_config};
use castellan::database;
use castellan::scheduler::{JobPayload, Schedule, ScheduledJob, Scheduler, SessionTarget, TokioScheduler};
use castellan::{ask, CoreContext, GraphContextBuilder};

#[derive(Parser)]
#[command(name = "castellan", version, about = "Always-on Roam Research chief of staff")]
struct Cli {
    /// Path to config.toml (defaults to ~/.castellan/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single chat turn and print the response.
    Ask {
        /// The message to send.
        message: String,
    },
    /// Inspect or validate the current configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage scheduled jobs (cron ticks, spec.md §4.6).
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Inspect MCP server connections (spec.md §4.5).
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },
    /// Print cost/usage history (spec.md §9 `cost_history`/`usage_stats`).
    Stats {
        /// Number of most recent days to show.
        #[arg(long, default_value_t = 14)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration as TOML.
    Show,
}

#[derive(Subcommand)]
enum ScheduleAction {
    List,
    Add {
        name: String,
        /// Interval in seconds between runs.
        #[arg(long)]
        interval_secs: u64,
        /// Prompt text to run through the agent on each tick.
        #[arg(long)]
        prompt: String,
    },
    Remove {
        id: String,
    },
    History {
        id: String,
    },
}

#[derive(Subcommand)]
enum McpAction {
    /// List connected server keys and their tool counts.
    List,
    /// Accept the current schema drift for a server, clearing its suspension.
    AcceptDrift {
        server_key: String,
    },
}

#[tokio::main]
async fn main() {
    castellan::logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config at {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => load_default_config(),
    };

    let db_path = match database::default_database_path() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to resolve database path: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, config, db_path).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(
    command: Command,
    config: castellan::config::AppConfig,
    db_path: PathBuf,
) -> Result<(), String> {
    match command {
        Command::Config {
            action: ConfigAction::Show,
        } => {
            let toml = toml::to_string_pretty(&config).map_err(|e| e.to_string())?;
            println!("{toml}");
            Ok(())
        }
        Command::Ask { message } => {
            let ctx = CoreContext::bootstrap(config, &db_path)
                .await
                .map_err(|e| e.to_string())?;
            let schemas = ctx
                .tool_registry
                .list()
                .into_iter()
                .map(|info| castellan::ai::types::ToolSchema {
                    name: info.name,
                    description: info.description,
                    input_schema: info.schema,
                })
                .collect();
            let builder = GraphContextBuilder::new(Arc::new(NullGraph), schemas);
            let response = ask(&ctx, &builder, &[], &message)
                .await
                .map_err(|e| e.to_string())?;
            println!("{response}");
            Ok(())
        }
        Command::Schedule { action } => run_schedule(action, config, db_path).await,
        Command::Mcp { action } => run_mcp(action, config, db_path).await,
        Command::Stats { days } => run_stats(&db_path, days),
    }
}

async fn run_schedule(
    action: ScheduleAction,
    _config: castellan::config::AppConfig,
    db_path: PathBuf,
) -> Result<(), String> {
    let pool = database::init(&db_path).map_err(|e| e.to_string())?;
    let bus: Arc<dyn castellan::event_bus::EventBus> =
        Arc::new(castellan::event_bus::TokioBroadcastBus::new());
    let sched = TokioScheduler::new_with_persistence(bus, Some(pool));

    match action {
        ScheduleAction::List => {
            for job in sched.list_jobs().await {
                println!("{}\t{}\t{:?}\tenabled={}", job.id, job.name, job.schedule, job.enabled);
            }
        }
        ScheduleAction::Add {
            name,
            interval_secs,
            prompt,
        } => {
            let id = sched
                .add_job(ScheduledJob {
                    id: String::new(),
                    name,
                    schedule: Schedule::Interval { secs: interval_secs },
                    session_target: SessionTarget::Main,
                    payload: JobPayload::AgentTurn { prompt },
                    enabled: true,
                    error_count: 0,
                    next_run: None,
                    active_hours: None,
                    delete_after_run: false,
                })
                .await;
            println!("created job {id}");
        }
        ScheduleAction::Remove { id } => {
            let removed = sched.remove_job(&id).await;
            println!("removed={removed}");
        }
        ScheduleAction::History { id } => {
            for exec in sched.job_history(&id).await {
                println!("{exec:?}");
            }
        }
    }
    Ok(())
}

async fn run_mcp(
    action: McpAction,
    config: castellan::config::AppConfig,
    db_path: PathBuf,
) -> Result<(), String> {
    let pool = database::init(&db_path).map_err(|e| e.to_string())?;
    let bus: Arc<dyn castellan::event_bus::EventBus> =
        Arc::new(castellan::event_bus::TokioBroadcastBus::new());
    let manager = castellan::mcp::bootstrap(config.mcp, bus, Some(&pool)).await;

    match action {
        McpAction::List => {
            for key in manager.server_keys().await {
                let tools = manager.tools_for(&key).await;
                let suspended = manager.is_suspended(&key).await;
                println!("{key}\ttools={}\tsuspended={suspended}", tools.len());
            }
        }
        McpAction::AcceptDrift { server_key } => {
            manager.accept_drift(&server_key).await;
            println!("accepted drift for {server_key}");
        }
    }
    Ok(())
}

fn run_stats(db_path: &std::path::Path, days: i64) -> Result<(), String> {
    use castellan::database::schema::{cost_history, usage_stats};

    let pool = database::init(db_path).map_err(|e| e.to_string())?;
    let mut conn = pool.get().map_err(|e| e.to_string())?;

    let usage: Vec<(String, i64, i64, i64)> = usage_stats::table
        .select((
            usage_stats::day,
            usage_stats::agent_runs,
            usage_stats::approvals_granted,
            usage_stats::approvals_denied,
        ))
        .order(usage_stats::day.desc())
        .limit(days)
        .load(&mut conn)
        .map_err(|e| e.to_string())?;

    println!("day\tagent_runs\tapprovals_granted\tapprovals_denied");
    for (day, runs, granted, denied) in usage {
        println!("{day}\t{runs}\t{granted}\t{denied}");
    }

    let costs: Vec<(String, String, f64)> = cost_history::table
        .select((cost_history::day, cost_history::model, cost_history::cost_usd))
        .order(cost_history::day.desc())
        .limit(days)
        .load(&mut conn)
        .map_err(|e| e.to_string())?;

    println!("\nday\tmodel\tcost_usd");
    for (day, model, cost) in costs {
        println!("{day}\t{model}\t{cost:.4}");
    }

    Ok(())
}

/// A no-op [`castellan::external::GraphAPI`] used only so `castellan ask`
/// can drive the agent loop without a live Roam connection. A real host
/// wires `GraphContextBuilder` to its own `GraphAPI` implementation.
struct NullGraph;

#[async_trait::async_trait]
impl castellan::external::GraphAPI for NullGraph {
    async fn get_page_tree_by_title(
        &self,
        _title: &str,
    ) -> castellan::external::GraphResult<Option<castellan::external::PageTree>> {
        Ok(None)
    }

    async fn get_page_tree_by_uid(
        &self,
        _uid: &str,
    ) -> castellan::external::GraphResult<Option<castellan::external::PageTree>> {
        Ok(None)
    }

    async fn create_block(
        &self,
        _args: castellan::external::CreateBlockArgs,
    ) -> castellan::external::GraphResult<String> {
        Err("NullGraph cannot mutate the graph".to_string())
    }

    async fn update_block(
        &self,
        _args: castellan::external::UpdateBlockArgs,
    ) -> castellan::external::GraphResult<()> {
        Err("NullGraph cannot mutate the graph".to_string())
    }

    async fn delete_block(&self, _uid: &str) -> castellan::external::GraphResult<()> {
        Err("NullGraph cannot mutate the graph".to_string())
    }

    async fn move_block(
        &self,
        _args: castellan::external::MoveBlockArgs,
    ) -> castellan::external::GraphResult<()> {
        Err("NullGraph cannot mutate the graph".to_string())
    }

    async fn ensure_page_by_title(&self, _title: &str) -> castellan::external::GraphResult<String> {
        Err("NullGraph cannot mutate the graph".to_string())
    }

    async fn query(&self, _datalog: &str) -> castellan::external::GraphResult<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }

    async fn pull(&self, _pattern: &str, _entity_id: &str) -> castellan::external::GraphResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    fn add_pull_watch(
        &self,
        _pattern: &str,
        _entity_id: &str,
        _callback: castellan::external::PullWatchCallback,
    ) -> castellan::external::GraphResult<String> {
        Ok(String::new())
    }

    fn remove_pull_watch(&self, _handle: &str) -> castellan::external::GraphResult<()> {
        Ok(())
    }

    async fn undo(&self) -> castellan::external::GraphResult<()> {
        Ok(())
    }

    async fn redo(&self) -> castellan::external::GraphResult<()> {
        Ok(())
    }

    async fn ui_open_page(&self, _uid: &str) -> castellan::external::GraphResult<()> {
        Ok(())
    }

    async fn ui_get_focused_block(&self) -> castellan::external::GraphResult<Option<String>> {
        Ok(None)
    }
}
