//! Tokio-backed scheduler implementation.
//!
//! `TokioScheduler` drives a background task that wakes every second, scans
//! for due jobs, executes them, records history, and reschedules.
//!
//! ## Stuck detection
//! A job is considered stuck if it doesn't complete within 120 seconds.
//! A `SystemError` event is emitted and the job's error count is incremented.
//!
//! ## Persistence
//! Jobs live in memory at runtime; when constructed with
//! [`TokioScheduler::new_with_persistence`] they are mirrored into the
//! `cron_jobs` table on every add/remove and reloaded from there on boot.
//!
//! ## Leader election
//! When persistence is enabled, only one running instance fires tickers
//! (spec.md §4.6): each tick the scheduler tries to hold or claim the
//! single `leader_election` row for scope `"cron"`, heartbeating it while
//! held and stealing it from a holder whose heartbeat has gone stale.
//! Without a database pool there is nothing to contend with, so the
//! scheduler always acts as leader.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    agent::{
        loop_::{AgentLoop, AgentTurnInput, AgentTurnResult, AgentTurnState},
        TurnContextBuilder,
    },
    database::{
        schema::{cron_jobs, leader_election},
        DbPool,
    },
    event_bus::{AppEvent, EventBus},
};

use super::traits::{
    ActiveHours, JobExecution, JobId, JobPayload, JobStatus, Schedule, ScheduledJob, Scheduler,
    SessionTarget,
};

// ─── Diesel row type ─────────────────────────────────────────────────────────

/// Sidecar fields that don't map onto a `cron_jobs` column are packed into
/// `last_run_error` as a JSON blob, prefixed so it's never mistaken for an
/// actual error message (spec.md §4.6: active hours, delete-after-run,
/// session target and error count survive a restart).
#[derive(Serialize, Deserialize, Default)]
struct JobExtra {
    session_target: SessionTarget,
    error_count: u32,
    active_hours: Option<ActiveHours>,
    delete_after_run: bool,
    last_error: Option<String>,
}

const EXTRA_PREFIX: &str = "__extra__:";

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = cron_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct ScheduledJobRow {
    id: String,
    name: String,
    job_type: String,
    expression: Option<String>,
    interval_minutes: Option<i32>,
    run_at_ms: Option<i64>,
    timezone: Option<String>,
    prompt: String,
    enabled: i32,
    created_at_ms: i64,
    last_run_ms: Option<i64>,
    run_count: i32,
    last_run_error: Option<String>,
}

impl ScheduledJobRow {
    fn from_job(job: &ScheduledJob) -> Option<Self> {
        let (job_type, expression, interval_minutes) = match &job.schedule {
            Schedule::Interval { secs } => {
                ("interval".to_string(), None, Some((*secs / 60).max(1) as i32))
            }
            Schedule::Cron { expr } => ("cron".to_string(), Some(expr.clone()), None),
        };
        let (discriminant, body) = match &job.payload {
            JobPayload::Heartbeat => ("heartbeat", String::new()),
            JobPayload::AgentTurn { prompt } => ("agent_turn", prompt.clone()),
            JobPayload::Notify { message } => ("notify", message.clone()),
        };
        let extra = JobExtra {
            session_target: job.session_target.clone(),
            error_count: job.error_count,
            active_hours: job.active_hours.clone(),
            delete_after_run: job.delete_after_run,
            last_error: None,
        };
        let last_run_error = Some(format!(
            "{EXTRA_PREFIX}{}",
            serde_json::to_string(&extra).ok()?
        ));
        Some(Self {
            id: job.id.clone(),
            name: job.name.clone(),
            job_type,
            expression,
            interval_minutes,
            run_at_ms: None,
            timezone: None,
            prompt: format!("{discriminant}\n{body}"),
            enabled: if job.enabled { 1 } else { 0 },
            created_at_ms: Utc::now().timestamp_millis(),
            last_run_ms: job.next_run.map(|t| t.timestamp_millis()),
            run_count: 0,
            last_run_error,
        })
    }

    fn into_job(self) -> Option<ScheduledJob> {
        let schedule = match self.job_type.as_str() {
            "cron" => Schedule::Cron {
                expr: self.expression.unwrap_or_else(|| "* * * * *".to_string()),
            },
            _ => Schedule::Interval {
                secs: (self.interval_minutes.unwrap_or(1).max(1) as u64) * 60,
            },
        };

        let mut lines = self.prompt.splitn(2, '\n');
        let discriminant = lines.next().unwrap_or("agent_turn");
        let body = lines.next().unwrap_or("").to_string();
        let payload = match discriminant {
            "heartbeat" => JobPayload::Heartbeat,
            "notify" => JobPayload::Notify { message: body },
            _ => JobPayload::AgentTurn { prompt: body },
        };

        let extra: JobExtra = self
            .last_run_error
            .as_deref()
            .and_then(|s| s.strip_prefix(EXTRA_PREFIX))
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();

        let next_run = self
            .last_run_ms
            .and_then(|ms| DateTime::from_timestamp_millis(ms))
            .map(|dt| dt.with_timezone(&Utc));

        Some(ScheduledJob {
            id: self.id,
            name: self.name,
            schedule,
            session_target: extra.session_target,
            payload,
            enabled: self.enabled != 0,
            error_count: extra.error_count,
            next_run,
            active_hours: extra.active_hours,
            delete_after_run: extra.delete_after_run,
        })
    }
}

// ─── Leader election row ──────────────────────────────────────────────────────

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = leader_election)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct LeaderRow {
    scope: String,
    tab_id: String,
    heartbeat_ms: i64,
}

/// The only scope this scheduler contends for; a distinct scope string would
/// let unrelated leader-elected subsystems share the same table.
const LEADER_SCOPE: &str = "cron";

// ─── Constants ────────────────────────────────────────────────────────────────

/// Maximum execution time before a job is flagged as stuck.
const STUCK_THRESHOLD_SECS: u64 = 120;

/// Scheduler tick interval — how often we check for due jobs.
const TICK_INTERVAL_SECS: u64 = 1;

/// How often a held or claimed leadership lease is renewed (spec.md §4.6).
const LEADER_HEARTBEAT_SECS: i64 = 30;

/// A leadership heartbeat older than this is stale and may be claimed by
/// another instance (spec.md §4.6).
const LEADER_STALE_SECS: i64 = 90;

/// Maximum history entries kept per job.
const MAX_HISTORY_PER_JOB: usize = 100;

// ─── Internal state ───────────────────────────────────────────────────────────

type JobMap = HashMap<JobId, ScheduledJob>;
type HistoryMap = HashMap<JobId, Vec<JobExecution>>;

// ─── TokioScheduler ───────────────────────────────────────────────────────────

/// In-memory, Tokio-driven scheduler with optional SQLite persistence.
pub struct TokioScheduler {
    jobs: Arc<RwLock<JobMap>>,
    history: Arc<RwLock<HistoryMap>>,
    bus: Arc<dyn EventBus>,
    /// Optional database pool for job persistence.
    pool: Option<DbPool>,
    /// Agent loop + context seam used to actually fire `AgentTurn` and
    /// `Heartbeat` payloads (spec.md §4.6). Empty when the scheduler is used
    /// purely for CRUD (e.g. the `castellan schedule` CLI), or before the
    /// host has wired a [`TurnContextBuilder`] via [`Self::set_agent`] —
    /// the tool registry and the cron-CRUD tool it exposes are built before
    /// the agent loop exists, so this can only be supplied after the fact.
    agent: Arc<RwLock<Option<Arc<AgentLoop>>>>,
    context_builder: Arc<RwLock<Option<Arc<dyn TurnContextBuilder>>>>,
    /// This instance's identity in the `leader_election` table (spec.md §4.6
    /// `tabId`).
    instance_id: String,
    /// Send `true` to stop the background task.
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl TokioScheduler {
    /// Create a scheduler without persistence (used in tests and early boot).
    pub fn new(bus: Arc<dyn EventBus>) -> Arc<Self> {
        Self::new_with_persistence(bus, None)
    }

    /// Create a scheduler with SQLite persistence.
    pub fn new_with_persistence(bus: Arc<dyn EventBus>, pool: Option<DbPool>) -> Arc<Self> {
        Self::new_inner(bus, pool, None, None)
    }

    /// Create a scheduler already wired to run due jobs through the agent
    /// loop, rather than merely recording that they fired.
    pub fn new_with_agent(
        bus: Arc<dyn EventBus>,
        pool: Option<DbPool>,
        agent: Arc<AgentLoop>,
        context_builder: Arc<dyn TurnContextBuilder>,
    ) -> Arc<Self> {
        Self::new_inner(bus, pool, Some(agent), Some(context_builder))
    }

    fn new_inner(
        bus: Arc<dyn EventBus>,
        pool: Option<DbPool>,
        agent: Option<Arc<AgentLoop>>,
        context_builder: Option<Arc<dyn TurnContextBuilder>>,
    ) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = Arc::new(Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(HashMap::new())),
            bus,
            pool,
            agent: Arc::new(RwLock::new(agent)),
            context_builder: Arc::new(RwLock::new(context_builder)),
            instance_id: Uuid::new_v4().to_string(),
            stop_tx,
            stop_rx,
        });
        // Load persisted jobs from DB on construction.
        if let Some(ref pool) = scheduler.pool {
            scheduler.load_jobs_from_db(pool);
        }
        scheduler
    }

    /// Load all persisted jobs from the `cron_jobs` table into memory.
    fn load_jobs_from_db(&self, pool: &DbPool) {
        let Ok(mut conn) = pool.get() else { return };
        let rows: Vec<ScheduledJobRow> = match cron_jobs::table
            .select(ScheduledJobRow::as_select())
            .load(&mut conn)
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("scheduler: failed to load persisted jobs: {e}");
                return;
            }
        };
        let Ok(mut map) = self.jobs.write() else { return };
        for row in rows {
            if let Some(job) = row.into_job() {
                map.insert(job.id.clone(), job);
            }
        }
        log::info!("scheduler: loaded {} persisted job(s) from DB", map.len());
    }

    /// Persist a job to the database (upsert).
    fn persist_job(&self, job: &ScheduledJob) {
        let Some(ref pool) = self.pool else { return };
        let Ok(mut conn) = pool.get() else { return };
        let Some(row) = ScheduledJobRow::from_job(job) else { return };
        if let Err(e) = diesel::replace_into(cron_jobs::table)
            .values(&row)
            .execute(&mut conn)
        {
            log::warn!("scheduler: failed to persist job '{}': {e}", job.id);
        }
    }

    /// Delete a job from the database.
    fn delete_job_from_db(&self, id: &str) {
        let Some(ref pool) = self.pool else { return };
        let Ok(mut conn) = pool.get() else { return };
        if let Err(e) = diesel::delete(cron_jobs::table.filter(cron_jobs::id.eq(id)))
            .execute(&mut conn)
        {
            log::warn!("scheduler: failed to delete job '{id}' from DB: {e}");
        }
    }

    /// Try to hold or claim the single `leader_election` row for scope
    /// `"cron"`. Returns whether this instance is (now) the leader.
    ///
    /// On a database error the call fails closed (`false`) — an instance
    /// that can't prove it holds the lease does not fire tickers, rather
    /// than risk a scheduled prompt firing twice across instances.
    fn try_claim_leadership(pool: &DbPool, instance_id: &str) -> bool {
        let Ok(mut conn) = pool.get() else { return false };
        let now_ms = Utc::now().timestamp_millis();

        let existing: Option<LeaderRow> = leader_election::table
            .filter(leader_election::scope.eq(LEADER_SCOPE))
            .select(LeaderRow::as_select())
            .first(&mut conn)
            .optional()
            .unwrap_or(None);

        let may_claim = match &existing {
            None => true,
            Some(row) if row.tab_id == instance_id => true,
            Some(row) => now_ms - row.heartbeat_ms > LEADER_STALE_SECS * 1000,
        };
        if !may_claim {
            return false;
        }

        let row = LeaderRow {
            scope: LEADER_SCOPE.to_string(),
            tab_id: instance_id.to_string(),
            heartbeat_ms: now_ms,
        };
        match diesel::replace_into(leader_election::table)
            .values(&row)
            .execute(&mut conn)
        {
            Ok(_) => true,
            Err(e) => {
                log::warn!("scheduler: failed to write leadership heartbeat: {e}");
                false
            }
        }
    }

    /// Compute the next run time for a job based on its schedule.
    ///
    /// Returns `None` if the schedule cannot be parsed (invalid cron expression).
    pub fn compute_next_run(schedule: &Schedule) -> Option<DateTime<Utc>> {
        match schedule {
            Schedule::Interval { secs } => {
                Some(Utc::now() + chrono::Duration::seconds(*secs as i64))
            }
            Schedule::Cron { expr } => {
                use std::str::FromStr;
                // The `cron` crate expects a 6-field expression (sec min hr dom mon dow).
                // We support either 5-field (min hr dom mon dow) or 6-field.
                let full_expr = if expr.split_whitespace().count() == 5 {
                    format!("0 {expr}")
                } else {
                    expr.clone()
                };
                cron::Schedule::from_str(&full_expr).ok()?.upcoming(Utc).next()
            }
        }
    }

    /// Wire the scheduler to run due jobs through a live agent loop. Safe to
    /// call after [`Scheduler::start`] has already begun ticking — each tick
    /// re-reads this lock, so the next tick picks up the agent immediately.
    pub fn set_agent(&self, agent: Arc<AgentLoop>, context_builder: Arc<dyn TurnContextBuilder>) {
        if let Ok(mut g) = self.agent.write() {
            *g = Some(agent);
        }
        if let Ok(mut g) = self.context_builder.write() {
            *g = Some(context_builder);
        }
    }

    /// Record a job execution in the history ring buffer.
    fn record_history(history: &Arc<RwLock<HistoryMap>>, exec: JobExecution) {
        if let Ok(mut map) = history.write() {
            let entries = map.entry(exec.job_id.clone()).or_default();
            entries.insert(0, exec);
            entries.truncate(MAX_HISTORY_PER_JOB);
        }
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn start(&self) {
        let jobs = self.jobs.clone();
        let history = self.history.clone();
        let bus = self.bus.clone();
        let agent_slot = self.agent.clone();
        let context_builder_slot = self.context_builder.clone();
        let leader_pool = self.pool.clone();
        let instance_id = self.instance_id.clone();
        let mut stop_rx = self.stop_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
            // No shared database means no other instance to contend with.
            let mut is_leader = leader_pool.is_none();
            let mut next_leader_check = Utc::now();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(pool) = &leader_pool {
                            if Utc::now() >= next_leader_check {
                                is_leader = TokioScheduler::try_claim_leadership(pool, &instance_id);
                                next_leader_check = Utc::now() + chrono::Duration::seconds(LEADER_HEARTBEAT_SECS);
                            }
                        }
                        if !is_leader {
                            continue;
                        }

                        let due: Vec<ScheduledJob> = {
                            let guard = match jobs.read() {
                                Ok(g) => g,
                                Err(_) => continue,
                            };
                            guard
                                .values()
                                .filter(|j| j.enabled)
                                .filter(|j| {
                                    j.next_run.map_or(false, |t| t <= Utc::now())
                                })
                                .cloned()
                                .collect()
                        };

                        let agent_clone = agent_slot.read().ok().and_then(|g| g.clone());
                        let context_builder_clone = context_builder_slot.read().ok().and_then(|g| g.clone());

                        for job in due {
                            let started_at = Utc::now();
                            let bus_clone = bus.clone();
                            let history_clone = history.clone();
                            let jobs_clone = jobs.clone();
                            let job_clone = job.clone();
                            let agent_clone = agent_clone.clone();
                            let context_builder_clone = context_builder_clone.clone();

                            tokio::spawn(async move {
                                // Emit CronFired / HeartbeatTick event.
                                let event = match &job_clone.payload {
                                    JobPayload::Heartbeat => {
                                        AppEvent::HeartbeatTick {
                                            timestamp: started_at.to_rfc3339(),
                                        }
                                    }
                                    _ => AppEvent::CronFired {
                                        job_id: job_clone.id.clone(),
                                        schedule: format!("{:?}", job_clone.schedule),
                                    },
                                };
                                let _ = bus_clone.publish(event);

                                // Execute with timeout for stuck detection.
                                let timeout = Duration::from_secs(STUCK_THRESHOLD_SECS);
                                let status = tokio::time::timeout(
                                    timeout,
                                    execute_job(&job_clone, agent_clone, context_builder_clone),
                                )
                                .await;

                                let (job_status, output) = match status {
                                    Ok((s, o)) => (s, o),
                                    Err(_) => {
                                        let _ = bus_clone.publish(AppEvent::SystemError {
                                            message: format!(
                                                "Job '{}' stuck after {}s",
                                                job_clone.name, STUCK_THRESHOLD_SECS
                                            ),
                                        });
                                        (JobStatus::Stuck, "Execution timed out".to_string())
                                    }
                                };

                                let finished_at = Utc::now();

                                // Record history.
                                let exec = JobExecution {
                                    job_id: job_clone.id.clone(),
                                    started_at,
                                    finished_at,
                                    status: job_status.clone(),
                                    output,
                                };
                                Self::record_history(&history_clone, exec);

                                // Reschedule and update error_count.
                                if let Ok(mut map) = jobs_clone.write() {
                                    if let Some(j) = map.get_mut(&job_clone.id) {
                                        if job_status == JobStatus::Success {
                                            j.error_count = 0;
                                        } else {
                                            j.error_count += 1;
                                        }
                                        j.next_run = Self::compute_next_run(&j.schedule);
                                    }
                                }
                            });
                        }
                    }
                    Ok(()) = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn add_job(&self, mut job: ScheduledJob) -> JobId {
        // Assign a fresh ID if none given.
        if job.id.is_empty() {
            job.id = Uuid::new_v4().to_string();
        }
        // Compute initial next_run.
        job.next_run = Self::compute_next_run(&job.schedule);

        // Persist to SQLite before updating in-memory map.
        self.persist_job(&job);

        let id = job.id.clone();
        if let Ok(mut map) = self.jobs.write() {
            map.insert(id.clone(), job);
        }
        id
    }

    async fn remove_job(&self, id: &JobId) -> bool {
        // Remove from SQLite.
        self.delete_job_from_db(id);

        if let Ok(mut map) = self.jobs.write() {
            map.remove(id).is_some()
        } else {
            false
        }
    }

    async fn list_jobs(&self) -> Vec<ScheduledJob> {
        self.jobs
            .read()
            .map(|m| {
                let mut jobs: Vec<ScheduledJob> = m.values().cloned().collect();
                jobs.sort_by(|a, b| a.name.cmp(&b.name));
                jobs
            })
            .unwrap_or_default()
    }

    async fn job_history(&self, id: &JobId) -> Vec<JobExecution> {
        self.history
            .read()
            .map(|m| m.get(id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

// ─── execute_job ─────────────────────────────────────────────────────────────

/// Heartbeat jobs without a more specific prompt get this one, so the agent
/// still has something to reason over (spec.md §4.6 heartbeat tick).
const HEARTBEAT_PROMPT: &str = "Perform your periodic heartbeat check-in.";

/// Execute a job's payload, returning `(status, output)`.
///
/// `AgentTurn` and `Heartbeat` payloads run a full (non-read-only) agent
/// turn when the scheduler was built with [`TokioScheduler::new_with_agent`];
/// without that wiring they degrade to a no-op success so CRUD-only
/// schedulers (the `castellan schedule` CLI) don't fail every tick. The
/// `Notify` payload is always lightweight — the event was already published
/// before `execute_job` runs.
#[tracing::instrument(skip_all, fields(job_id = %job.id, job_name = %job.name))]
async fn execute_job(
    job: &ScheduledJob,
    agent: Option<Arc<AgentLoop>>,
    context_builder: Option<Arc<dyn TurnContextBuilder>>,
) -> (JobStatus, String) {
    match &job.payload {
        JobPayload::Heartbeat => match (agent, context_builder) {
            (Some(agent), Some(builder)) => {
                run_agent_prompt(&agent, builder.as_ref(), HEARTBEAT_PROMPT).await
            }
            _ => (JobStatus::Success, "Heartbeat tick recorded.".to_string()),
        },
        JobPayload::AgentTurn { prompt } => match (agent, context_builder) {
            (Some(agent), Some(builder)) => run_agent_prompt(&agent, builder.as_ref(), prompt).await,
            _ => (
                JobStatus::Skipped,
                format!("AgentTurn skipped (scheduler has no agent wired): {prompt}"),
            ),
        },
        JobPayload::Notify { message } => {
            (JobStatus::Success, format!("Notification sent: {message}"))
        }
    }
}

/// Drive one unattended agent turn for a cron/heartbeat prompt.
///
/// Unlike the inbox processor, cron jobs are not forced read-only — a
/// scheduled prompt is expected to act. A mutating call that still needs
/// approval has no one to approve it, so that case is recorded as a failure
/// rather than silently dropped.
async fn run_agent_prompt(agent: &AgentLoop, builder: &dyn TurnContextBuilder, prompt: &str) -> (JobStatus, String) {
    let content = builder.build(prompt).await;
    let schemas = builder.tool_schemas();
    let input = AgentTurnInput {
        turns: &[],
        user_message: prompt,
        page_changed_notice: None,
        section_content: &content,
        previous_sections: None,
        read_only: false,
        skill: None,
    };
    let mut state = AgentTurnState::default();
    match agent.run(input, &mut state, schemas).await {
        Ok(AgentTurnResult::Completed(outcome)) => (JobStatus::Success, outcome.response_text),
        Ok(AgentTurnResult::NeedsApproval { tool_name, .. }) => (
            JobStatus::Failed,
            format!("requires approval for '{tool_name}', but unattended cron jobs cannot grant it"),
        ),
        Err(e) => (JobStatus::Failed, e.to_string()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::TokioBroadcastBus;

    fn make_scheduler() -> Arc<TokioScheduler> {
        let bus: Arc<dyn EventBus> = Arc::new(TokioBroadcastBus::new());
        TokioScheduler::new(bus)
    }

    fn interval_job(name: &str, secs: u64) -> ScheduledJob {
        ScheduledJob {
            id: String::new(), // assigned by add_job
            name: name.to_string(),
            schedule: Schedule::Interval { secs },
            session_target: super::super::traits::SessionTarget::Main,
            payload: JobPayload::Heartbeat,
            enabled: true,
            error_count: 0,
            next_run: None,
            active_hours: None,
            delete_after_run: false,
        }
    }

    #[tokio::test]
    async fn add_and_list_job() {
        let scheduler = make_scheduler();
        let job = interval_job("my-job", 60);
        let id = scheduler.add_job(job.clone()).await;

        let jobs = scheduler.list_jobs().await;
        assert_eq!(jobs.len(), 1, "should have 1 job");
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].name, "my-job");
    }

    #[tokio::test]
    async fn remove_existing_job_returns_true() {
        let scheduler = make_scheduler();
        let id = scheduler.add_job(interval_job("j", 10)).await;
        let removed = scheduler.remove_job(&id).await;
        assert!(removed, "should remove existing job");

        let jobs = scheduler.list_jobs().await;
        assert!(jobs.is_empty(), "no jobs after removal");
    }

    #[tokio::test]
    async fn remove_nonexistent_job_returns_false() {
        let scheduler = make_scheduler();
        let removed = scheduler.remove_job(&"no-such-id".to_string()).await;
        assert!(!removed, "removing unknown job → false");
    }

    #[tokio::test]
    async fn add_job_assigns_id_when_empty() {
        let scheduler = make_scheduler();
        let mut job = interval_job("j", 10);
        job.id = String::new();
        let id = scheduler.add_job(job).await;
        assert!(!id.is_empty(), "scheduler should assign a non-empty id");
    }

    #[tokio::test]
    async fn add_job_uses_provided_id() {
        let scheduler = make_scheduler();
        let mut job = interval_job("j", 10);
        job.id = "custom-id".to_string();
        let id = scheduler.add_job(job).await;
        assert_eq!(id, "custom-id", "should use provided job id");
    }

    #[tokio::test]
    async fn job_history_empty_for_new_job() {
        let scheduler = make_scheduler();
        let id = scheduler.add_job(interval_job("j", 10)).await;
        let hist = scheduler.job_history(&id).await;
        assert!(hist.is_empty(), "new job has no history");
    }

    #[test]
    fn compute_next_run_interval() {
        let before = Utc::now();
        let next = TokioScheduler::compute_next_run(&Schedule::Interval { secs: 300 });
        assert!(next.is_some(), "interval schedule should produce a next_run");
        assert!(next.unwrap() > before, "next_run should be in the future");
    }

    #[test]
    fn compute_next_run_cron_valid() {
        // "* * * * *" = every minute
        let next = TokioScheduler::compute_next_run(&Schedule::Cron {
            expr: "* * * * *".to_string(),
        });
        assert!(next.is_some(), "valid cron expression should produce a next_run");
    }

    #[test]
    fn compute_next_run_cron_invalid() {
        let next = TokioScheduler::compute_next_run(&Schedule::Cron {
            expr: "not a cron expression".to_string(),
        });
        assert!(next.is_none(), "invalid cron expression → None");
    }

    #[test]
    fn compute_next_run_cron_six_field() {
        // 6-field cron (with seconds) should also be accepted.
        let next = TokioScheduler::compute_next_run(&Schedule::Cron {
            expr: "0 * * * * *".to_string(),
        });
        assert!(next.is_some(), "6-field cron should produce a next_run");
    }

    #[tokio::test]
    async fn list_jobs_sorted_by_name() {
        let scheduler = make_scheduler();
        scheduler.add_job(interval_job("zebra", 10)).await;
        scheduler.add_job(interval_job("alpha", 10)).await;
        scheduler.add_job(interval_job("mango", 10)).await;

        let jobs = scheduler.list_jobs().await;
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mango", "zebra"], "jobs should be sorted by name");
    }

    // ─── Leader election ──────────────────────────────────────────────────────

    fn test_pool() -> DbPool {
        let dir = tempfile::tempdir().expect("tempdir");
        crate::database::init(&dir.path().join("app.db")).expect("init test db")
    }

    #[test]
    fn first_instance_claims_an_empty_leader_row() {
        let pool = test_pool();
        assert!(TokioScheduler::try_claim_leadership(&pool, "instance-a"));
    }

    #[test]
    fn holder_renews_its_own_lease() {
        let pool = test_pool();
        assert!(TokioScheduler::try_claim_leadership(&pool, "instance-a"));
        assert!(TokioScheduler::try_claim_leadership(&pool, "instance-a"));
    }

    #[test]
    fn non_holder_cannot_steal_a_fresh_lease() {
        let pool = test_pool();
        assert!(TokioScheduler::try_claim_leadership(&pool, "instance-a"));
        assert!(!TokioScheduler::try_claim_leadership(&pool, "instance-b"));
    }

    #[test]
    fn non_holder_steals_a_stale_lease() {
        let pool = test_pool();
        let mut conn = pool.get().expect("conn");
        let stale_row = LeaderRow {
            scope: LEADER_SCOPE.to_string(),
            tab_id: "instance-a".to_string(),
            heartbeat_ms: Utc::now().timestamp_millis() - (LEADER_STALE_SECS + 1) * 1000,
        };
        diesel::replace_into(leader_election::table)
            .values(&stale_row)
            .execute(&mut conn)
            .expect("seed stale row");

        assert!(TokioScheduler::try_claim_leadership(&pool, "instance-b"));
    }
}
