//! Sequential Inbox-page processing (spec.md §4.7 "Processing").
//!
//! [`InboxProcessor`] owns the pending-queue/backpressure state machine and
//! drives each candidate block through a read-only agent turn, one at a
//! time (spec.md §5 "`inboxProcessingQueue`: a single promise chain
//! guarantees sequential item processing").

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{Datelike, Utc};
use serde_json::Value;
use tracing::warn;

use crate::agent::context_source::TurnContextBuilder;
use crate::agent::loop_::{AgentLoop, AgentTurnInput, AgentTurnResult, AgentTurnState};
use crate::config::schema::InboxConfig;
use crate::event_bus::{AppEvent, EventBus};
use crate::external::{BlockOrder, CreateBlockArgs, GraphAPI, MoveBlockArgs, PageTree};

use super::snapshot::{diff_new_children, partition_startup_children, InboxCandidate};

/// Title of the page this crate treats as the inbox ingress (spec.md §4.7).
pub const INBOX_PAGE_TITLE: &str = "Chief of Staff Inbox";

/// Heading block under today's daily page that processed items are filed
/// under (spec.md §4.7 "a 'Processed Chief of Staff items' heading").
pub const PROCESSED_HEADING: &str = "Processed Chief of Staff items";

/// Drives the Inbox page's change detection, backpressure, and sequential
/// read-only agent turns.
pub struct InboxProcessor {
    graph: Arc<dyn GraphAPI>,
    agent: Arc<AgentLoop>,
    context: Arc<dyn TurnContextBuilder>,
    events: Arc<dyn EventBus>,
    config: InboxConfig,

    static_uids: Mutex<HashSet<String>>,
    /// UIDs currently queued or being processed — prevents re-enqueueing a
    /// candidate that's already in the pipeline.
    queued_uids: Mutex<HashSet<String>>,
    queue: Mutex<VecDeque<InboxCandidate>>,

    last_full_scan: Mutex<Option<Instant>>,
    last_signature: Mutex<Option<(usize, usize)>>,
    /// Set when a candidate is dropped under backpressure; cleared once a
    /// catch-up scan has run after the queue drains (spec.md §4.7
    /// "Backpressure").
    catch_up_pending: Mutex<bool>,
}

impl InboxProcessor {
    /// Captures the startup snapshot (spec.md §4.7 "Static snapshot") and
    /// seeds the queue with whatever non-boilerplate children are already
    /// present on the Inbox page.
    pub async fn bootstrap(
        graph: Arc<dyn GraphAPI>,
        agent: Arc<AgentLoop>,
        context: Arc<dyn TurnContextBuilder>,
        events: Arc<dyn EventBus>,
        config: InboxConfig,
    ) -> Result<Arc<Self>, String> {
        let processor = Arc::new(Self {
            graph: graph.clone(),
            agent,
            context,
            events,
            config,
            static_uids: Mutex::new(HashSet::new()),
            queued_uids: Mutex::new(HashSet::new()),
            queue: Mutex::new(VecDeque::new()),
            last_full_scan: Mutex::new(None),
            last_signature: Mutex::new(None),
            catch_up_pending: Mutex::new(false),
        });

        if let Some(inbox) = graph.get_page_tree_by_title(INBOX_PAGE_TITLE).await? {
            let (static_uids, candidates) = partition_startup_children(&inbox);
            *processor.static_uids.lock().expect("static_uids lock poisoned") = static_uids;
            for candidate in candidates {
                processor.try_enqueue(candidate);
            }
        } else {
            graph.ensure_page_by_title(INBOX_PAGE_TITLE).await?;
        }

        Ok(processor)
    }

    /// Fast-path callback for a live pull-watch on the Inbox page (spec.md
    /// §4.7 "diff before/after child lists"). Registered via
    /// `GraphAPI::add_pull_watch` by the embedding caller.
    pub fn handle_pull_update(&self, before: Value, after: Value) {
        for candidate in diff_new_children(&before, &after) {
            self.try_enqueue(candidate);
        }
    }

    /// Runs the full-scan fallback if the queue is idle, the cool-down has
    /// elapsed, and the page's signature has actually changed (spec.md §4.7
    /// "Full-scan fallback").
    #[tracing::instrument(skip_all)]
    pub async fn maybe_full_scan(&self) {
        let queue_len = self.queue.lock().expect("queue lock poisoned").len();
        if queue_len != 0 {
            return;
        }

        let cooldown = Duration::from_secs(self.config.full_scan_cooldown_secs);
        {
            let last = self.last_full_scan.lock().expect("last_full_scan lock poisoned");
            if let Some(last) = *last {
                if last.elapsed() < cooldown {
                    return;
                }
            }
        }

        let Ok(Some(inbox)) = self.graph.get_page_tree_by_title(INBOX_PAGE_TITLE).await else {
            return;
        };

        let signature = (inbox.children.len(), self.queued_uids.lock().expect("queued_uids lock poisoned").len());
        {
            let mut last_sig = self.last_signature.lock().expect("last_signature lock poisoned");
            if *last_sig == Some(signature) {
                return;
            }
            *last_sig = Some(signature);
        }
        *self.last_full_scan.lock().expect("last_full_scan lock poisoned") = Some(Instant::now());

        let static_uids = self.static_uids.lock().expect("static_uids lock poisoned").clone();
        for child in &inbox.children {
            if static_uids.contains(&child.uid) {
                continue;
            }
            self.try_enqueue(InboxCandidate {
                uid: child.uid.clone(),
                text: child.string.clone(),
            });
        }

        *self.catch_up_pending.lock().expect("catch_up_pending lock poisoned") = false;
    }

    /// Enqueues a candidate unless it's static, already queued/in-flight, or
    /// the pending queue is at capacity (spec.md §4.7 "Backpressure": "skip
    /// enqueuing entirely; a catch-up scan is scheduled once the queue
    /// drains").
    fn try_enqueue(&self, candidate: InboxCandidate) -> bool {
        if self.static_uids.lock().expect("static_uids lock poisoned").contains(&candidate.uid) {
            return false;
        }
        let mut queued = self.queued_uids.lock().expect("queued_uids lock poisoned");
        if queued.contains(&candidate.uid) {
            return false;
        }
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        if queue.len() >= self.config.queue_capacity {
            *self.catch_up_pending.lock().expect("catch_up_pending lock poisoned") = true;
            return false;
        }
        queued.insert(candidate.uid.clone());
        queue.push_back(candidate);
        true
    }

    /// Drains the pending queue sequentially, one item at a time, forever
    /// (spec.md §5 "single promise chain"). Intended to be spawned once as
    /// a background task by the embedding caller.
    pub async fn run_processing_loop(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().expect("queue lock poisoned").pop_front();
            let Some(candidate) = next else {
                tokio::time::sleep(Duration::from_millis(250)).await;
                continue;
            };

            self.process_item(&candidate).await;

            self.queued_uids
                .lock()
                .expect("queued_uids lock poisoned")
                .remove(&candidate.uid);

            let queue_empty = self.queue.lock().expect("queue lock poisoned").is_empty();
            let pending = *self.catch_up_pending.lock().expect("catch_up_pending lock poisoned");
            if queue_empty && pending {
                self.maybe_full_scan().await;
            }
        }
    }

    /// Processes one candidate end to end (spec.md §4.7 "Processing"): a
    /// read-only agent turn in an isolated, always-cleared context, then
    /// (if the block still exists) a move under today's processed heading.
    #[tracing::instrument(skip_all, fields(uid = %candidate.uid))]
    async fn process_item(&self, candidate: &InboxCandidate) {
        let current_text = match self.graph.pull(":block/string", &candidate.uid).await {
            Ok(v) => v.as_str().map(str::to_string),
            Err(e) => {
                warn!(uid = %candidate.uid, error = %e, "inbox: failed to re-read block");
                return;
            }
        };
        let Some(text) = current_text.filter(|s| !s.trim().is_empty()) else {
            return;
        };

        let section_content = self.context.build(&text).await;
        let tool_schemas = self.context.tool_schemas();
        let input = AgentTurnInput {
            turns: &[],
            user_message: &text,
            page_changed_notice: None,
            section_content: &section_content,
            previous_sections: None,
            read_only: true,
            skill: None,
        };
        let mut state = AgentTurnState::default();

        let response_text = match self.agent.run(input, &mut state, tool_schemas).await {
            Ok(AgentTurnResult::Completed(outcome)) => outcome.response_text,
            Ok(AgentTurnResult::NeedsApproval { tool_name, .. }) => {
                // Unreachable under `read_only: true` — mutating calls are
                // denied before the router's approval gate runs. Logged
                // defensively in case that invariant is ever broken.
                warn!(uid = %candidate.uid, tool_name, "inbox: unexpected approval request on a read-only turn");
                return;
            }
            Err(e) => {
                warn!(uid = %candidate.uid, error = %e, "inbox: agent turn failed");
                return;
            }
        };

        if self.graph.pull(":block/string", &candidate.uid).await.ok().flatten_is_none() {
            return;
        }

        if let Err(e) = self.move_to_processed(&candidate.uid, &response_text).await {
            warn!(uid = %candidate.uid, error = %e, "inbox: failed to file processed item");
            return;
        }

        let _ = self.events.publish(AppEvent::InboxItemProcessed {
            uid: candidate.uid.clone(),
            response_preview: response_text.chars().take(200).collect(),
        });
    }

    async fn move_to_processed(&self, uid: &str, response_text: &str) -> Result<(), String> {
        let daily_title = today_daily_page_title();
        let daily_uid = self.graph.ensure_page_by_title(&daily_title).await?;

        let heading_uid = match self.graph.get_page_tree_by_uid(&daily_uid).await? {
            Some(tree) => find_heading(&tree, PROCESSED_HEADING),
            None => None,
        };
        let heading_uid = match heading_uid {
            Some(uid) => uid,
            None => {
                self.graph
                    .create_block(CreateBlockArgs {
                        parent_uid: daily_uid.clone(),
                        text: PROCESSED_HEADING.to_string(),
                        order: BlockOrder::Last,
                    })
                    .await?
            }
        };

        self.graph
            .move_block(MoveBlockArgs {
                uid: uid.to_string(),
                parent_uid: heading_uid,
                order: BlockOrder::Last,
            })
            .await?;

        self.graph
            .create_block(CreateBlockArgs {
                parent_uid: uid.to_string(),
                text: response_text.to_string(),
                order: BlockOrder::Last,
            })
            .await?;

        Ok(())
    }
}

fn find_heading(tree: &PageTree, heading: &str) -> Option<String> {
    tree.children
        .iter()
        .find(|c| c.string == heading)
        .map(|c| c.uid.clone())
}

/// Formats today's date the way a daily-note page is conventionally titled
/// (e.g. "July 30th, 2026").
fn today_daily_page_title() -> String {
    let now = Utc::now();
    let day = now.day();
    let suffix = match (day % 10, day % 100) {
        (1, 11..=13) => "th",
        (1, _) => "st",
        (2, 11..=13) => "th",
        (2, _) => "nd",
        (3, 11..=13) => "th",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{} {day}{suffix}, {}", now.format("%B"), now.year())
}

/// Small helper so `process_item`'s "still exists" check reads naturally —
/// `Value::Null`/missing and an empty string both count as "deleted".
trait OptionExt {
    fn flatten_is_none(&self) -> bool;
}

impl OptionExt for Option<Value> {
    fn flatten_is_none(&self) -> bool {
        match self {
            None => true,
            Some(v) => v.as_str().map(|s| s.trim().is_empty()).unwrap_or(true),
        }
    }
}
