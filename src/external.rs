//! External interfaces (spec.md §6) — the narrow seams between this crate
//! and the host it is embedded in. Nothing in this module has a concrete,
//! production implementation here: the embedding host supplies one.
//! [`crate::ai::provider::LLMProvider`] is the third external seam named by
//! §6; it lives in `ai::provider` because every other `ai` module depends on
//! it directly.

use async_trait::async_trait;
use serde_json::Value;

/// One node of a bounded graph-page tree (spec.md §6 "depth-6 bounded pull").
#[derive(Debug, Clone)]
pub struct PageTree {
    pub uid: String,
    pub title: Option<String>,
    pub string: String,
    pub children: Vec<PageTree>,
}

/// Where a new block is inserted relative to its siblings.
#[derive(Debug, Clone, Copy)]
pub enum BlockOrder {
    First,
    Last,
    Index(usize),
}

#[derive(Debug, Clone)]
pub struct CreateBlockArgs {
    pub parent_uid: String,
    pub text: String,
    pub order: BlockOrder,
}

#[derive(Debug, Clone)]
pub struct UpdateBlockArgs {
    pub uid: String,
    pub string: String,
}

#[derive(Debug, Clone)]
pub struct MoveBlockArgs {
    pub uid: String,
    pub parent_uid: String,
    pub order: BlockOrder,
}

pub type GraphError = String;
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// A watch on a host-graph entity; `before`/`after` are pulled entities in
/// the host's own pattern format (spec.md §6 `addPullWatch`).
pub type PullWatchCallback = Box<dyn Fn(Value, Value) + Send + Sync>;

/// The host graph application (spec.md §6 "GraphAPI"). Every tool in
/// `tools::graph_tools` and every context-pipeline section pull goes through
/// this trait — nothing in this crate talks to the host's storage directly.
#[async_trait]
pub trait GraphAPI: Send + Sync {
    async fn get_page_tree_by_title(&self, title: &str) -> GraphResult<Option<PageTree>>;
    async fn get_page_tree_by_uid(&self, uid: &str) -> GraphResult<Option<PageTree>>;
    async fn create_block(&self, args: CreateBlockArgs) -> GraphResult<String>;
    async fn update_block(&self, args: UpdateBlockArgs) -> GraphResult<()>;
    async fn delete_block(&self, uid: &str) -> GraphResult<()>;
    async fn move_block(&self, args: MoveBlockArgs) -> GraphResult<()>;
    async fn ensure_page_by_title(&self, title: &str) -> GraphResult<String>;
    async fn query(&self, datalog: &str) -> GraphResult<Vec<Value>>;
    async fn pull(&self, pattern: &str, entity_id: &str) -> GraphResult<Value>;

    /// Registers a live watch; returns a handle id for `remove_pull_watch`.
    fn add_pull_watch(
        &self,
        pattern: &str,
        entity_id: &str,
        callback: PullWatchCallback,
    ) -> GraphResult<String>;
    fn remove_pull_watch(&self, handle: &str) -> GraphResult<()>;

    async fn undo(&self) -> GraphResult<()>;
    async fn redo(&self) -> GraphResult<()>;

    async fn ui_open_page(&self, uid: &str) -> GraphResult<()>;
    async fn ui_get_focused_block(&self) -> GraphResult<Option<String>>;
}

/// Risk-free preview of a pending mutating tool call, shown to the user by
/// `UIHost::prompt_approval` (spec.md §4.4 approval gate).
#[derive(Debug, Clone)]
pub struct ApprovalPreview {
    pub tool_name: String,
    pub arguments_preview: String,
}

/// The host UI shell (spec.md §6 "UIHost").
#[async_trait]
pub trait UIHost: Send + Sync {
    fn show_info_toast(&self, title: &str, message: &str);
    fn show_error_toast(&self, title: &str, message: &str);
    fn show_reminder_toast(&self, title: &str, message: &str);

    async fn prompt_approval(&self, preview: ApprovalPreview) -> bool;
    async fn prompt_text(&self, title: &str, placeholder: &str, confirm_label: &str) -> Option<String>;
    async fn prompt_select(&self, items: Vec<String>, title: &str, confirm_label: &str) -> Option<String>;

    fn chat_panel_append_message(&self, role: &str, text: &str);
    fn chat_panel_update_cost_indicator(&self);
    fn chat_panel_set_open(&self, open: bool);

    fn register_command(&self, label: &str, callback: Box<dyn Fn() + Send + Sync>);

    fn get_setting(&self, key: &str) -> Option<Value>;
    fn set_setting(&self, key: &str, value: Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingUiHost {
        toasts: Mutex<Vec<String>>,
    }

    impl RecordingUiHost {
        fn new() -> Self {
            Self {
                toasts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl UIHost for RecordingUiHost {
        fn show_info_toast(&self, title: &str, message: &str) {
            self.toasts
                .lock()
                .expect("lock poisoned")
                .push(format!("{title}: {message}"));
        }
        fn show_error_toast(&self, _title: &str, _message: &str) {}
        fn show_reminder_toast(&self, _title: &str, _message: &str) {}
        async fn prompt_approval(&self, _preview: ApprovalPreview) -> bool {
            true
        }
        async fn prompt_text(&self, _title: &str, _placeholder: &str, _confirm_label: &str) -> Option<String> {
            None
        }
        async fn prompt_select(&self, _items: Vec<String>, _title: &str, _confirm_label: &str) -> Option<String> {
            None
        }
        fn chat_panel_append_message(&self, _role: &str, _text: &str) {}
        fn chat_panel_update_cost_indicator(&self) {}
        fn chat_panel_set_open(&self, _open: bool) {}
        fn register_command(&self, _label: &str, _callback: Box<dyn Fn() + Send + Sync>) {}
        fn get_setting(&self, _key: &str) -> Option<Value> {
            None
        }
        fn set_setting(&self, _key: &str, _value: Value) {}
    }

    #[test]
    fn mock_ui_host_records_toasts() {
        let host = RecordingUiHost::new();
        host.show_info_toast("Hi", "there");
        assert_eq!(host.toasts.lock().expect("lock poisoned").len(), 1);
    }

    #[tokio::test]
    async fn mock_ui_host_approves_by_default() {
        let host = RecordingUiHost::new();
        let approved = host
            .prompt_approval(ApprovalPreview {
                tool_name: "createBlock".into(),
                arguments_preview: "{}".into(),
            })
            .await;
        assert!(approved);
    }
}
