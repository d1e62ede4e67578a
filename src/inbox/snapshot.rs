//! Static snapshot + candidate extraction for the Inbox page (spec.md §4.7
//! "Static snapshot at startup" / "Change detection").

use std::collections::HashSet;

use serde_json::Value;

use crate::external::PageTree;

/// A block discovered as a top-level child of the Inbox page, either at
/// startup or via a later pull-watch diff / full scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxCandidate {
    pub uid: String,
    pub text: String,
}

/// Fixed allowlist of onboarding/template block text left on a fresh Inbox
/// page (spec.md §4.7 "exact text match against a fixed allowlist"). These
/// are never treated as candidates, at startup or later.
pub const STATIC_INSTRUCTION_ALLOWLIST: &[&str] = &[
    "Type a request here and it will be picked up automatically.",
    "Drop anything you want handled here — it will be processed in the background.",
];

/// Walks the Inbox page's direct children, splitting them into the
/// permanently ignored static set (allowlisted boilerplate) and the
/// candidates left over (spec.md §4.7: "Everything else becomes a
/// candidate" — including anything already sitting on the page at boot).
pub fn partition_startup_children(inbox_page: &PageTree) -> (HashSet<String>, Vec<InboxCandidate>) {
    let mut static_uids = HashSet::new();
    let mut candidates = Vec::new();
    for child in &inbox_page.children {
        if STATIC_INSTRUCTION_ALLOWLIST.contains(&child.string.as_str()) {
            static_uids.insert(child.uid.clone());
        } else {
            candidates.push(InboxCandidate {
                uid: child.uid.clone(),
                text: child.string.clone(),
            });
        }
    }
    (static_uids, candidates)
}

/// Pulls `(uid, string)` pairs for a pulled page/block entity's direct
/// children out of the host's raw pull-watch payload. The host's datalog
/// pattern is expected to nest children under `"children"` as `{"uid": ...,
/// "string": ...}` objects, mirroring [`PageTree`]'s own shape — the
/// pull-watch contract promises the same tree the rest of this crate reads
/// through `GraphAPI::pull`, just undecoded.
pub fn extract_children(pulled: &Value) -> Vec<(String, String)> {
    let Some(children) = pulled.get("children").and_then(Value::as_array) else {
        return Vec::new();
    };
    children
        .iter()
        .filter_map(|c| {
            let uid = c.get("uid").and_then(Value::as_str)?;
            let string = c.get("string").and_then(Value::as_str).unwrap_or_default();
            Some((uid.to_string(), string.to_string()))
        })
        .collect()
}

/// Diffs two pulled Inbox-page payloads for the fast path (spec.md §4.7
/// "diff before/after child lists; any new UID that is not static, not
/// queued, not in-flight is a candidate"). Returns candidates present in
/// `after` but absent from `before`.
pub fn diff_new_children(before: &Value, after: &Value) -> Vec<InboxCandidate> {
    let before_uids: HashSet<String> = extract_children(before).into_iter().map(|(u, _)| u).collect();
    extract_children(after)
        .into_iter()
        .filter(|(uid, _)| !before_uids.contains(uid))
        .map(|(uid, text)| InboxCandidate { uid, text })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(uid: &str, children: Vec<PageTree>) -> PageTree {
        PageTree {
            uid: uid.to_string(),
            title: Some("Chief of Staff Inbox".to_string()),
            string: String::new(),
            children,
        }
    }

    fn block(uid: &str, string: &str) -> PageTree {
        PageTree {
            uid: uid.to_string(),
            title: None,
            string: string.to_string(),
            children: vec![],
        }
    }

    #[test]
    fn startup_partition_separates_allowlisted_boilerplate() {
        let inbox = page(
            "inbox-uid",
            vec![
                block("tmpl-1", STATIC_INSTRUCTION_ALLOWLIST[0]),
                block("real-1", "Draft a reply to Alex about the roadmap."),
            ],
        );
        let (static_uids, candidates) = partition_startup_children(&inbox);
        assert!(static_uids.contains("tmpl-1"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].uid, "real-1");
    }

    #[test]
    fn diff_new_children_finds_only_added_uids() {
        let before = json!({"children": [{"uid": "a", "string": "first"}]});
        let after = json!({"children": [
            {"uid": "a", "string": "first"},
            {"uid": "b", "string": "second"},
        ]});
        let added = diff_new_children(&before, &after);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].uid, "b");
        assert_eq!(added[0].text, "second");
    }

    #[test]
    fn diff_new_children_empty_when_nothing_added() {
        let before = json!({"children": [{"uid": "a", "string": "first"}]});
        let after = before.clone();
        assert!(diff_new_children(&before, &after).is_empty());
    }
}
