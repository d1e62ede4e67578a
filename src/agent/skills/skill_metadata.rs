//! Skill metadata: the trimmed shape the gathering guard needs (spec.md
//! §4.1 "Gathering guard", glossary "Skill").
//!
//! The donor's markdown-frontmatter skill engine (three-tier loading,
//! `{{parameter}}` template rendering) is out of scope here — spec.md §1
//! treats the skills markdown format and bootstrap content as external,
//! configurable host-page content. What survives is the shape the agent
//! loop actually consumes: a name, an ordered instruction list, and the
//! set of tool-call sources a skill declares as required before the model
//! may write anything.

use serde::{Deserialize, Serialize};

/// A named playbook resolved from the host's Skills page (spec.md glossary
/// "Skill"). `required_sources` drives the gathering guard: every name in
/// this list must have been called at least once before the agent loop
/// lets a writer run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub instructions: Vec<String>,
    #[serde(default)]
    pub required_sources: Vec<String>,
}

impl Skill {
    pub fn new(name: impl Into<String>, instructions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            instructions,
            required_sources: Vec::new(),
        }
    }

    pub fn with_required_sources(mut self, sources: Vec<String>) -> Self {
        self.required_sources = sources;
        self
    }

    /// Compact one-line index entry for the context pipeline's `skills`
    /// system-prompt section (spec.md §4.3).
    pub fn index_line(&self) -> String {
        self.name.clone()
    }
}

/// A snapshot of the Skills page's resolvable skills, cached alongside the
/// context pipeline's other section caches (spec.md §4.3 cache TTL).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillSnapshot {
    pub version: String,
    pub skills: Vec<Skill>,
}

impl SkillSnapshot {
    pub fn find(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn index(&self) -> String {
        self.skills.iter().map(Skill::index_line).collect::<Vec<_>>().join("\n")
    }
}

/// Tracks, for one agent loop, which of a skill's `required_sources` have
/// been satisfied by a successful tool call (spec.md §4.1 "Gathering
/// guard": "verify every required call count has been met").
#[derive(Debug, Clone, Default)]
pub struct GatheringGuard {
    pub required: Vec<String>,
    pub satisfied: std::collections::HashSet<String>,
}

impl GatheringGuard {
    pub fn for_skill(skill: &Skill) -> Option<Self> {
        if skill.required_sources.is_empty() {
            None
        } else {
            Some(Self {
                required: skill.required_sources.clone(),
                satisfied: std::collections::HashSet::new(),
            })
        }
    }

    /// Records a successful tool call by name; matches a required source
    /// either exactly or as a case-insensitive substring (tool names often
    /// carry a routed prefix, e.g. `mcp:notion:search`).
    pub fn record_success(&mut self, tool_name: &str) {
        let lower = tool_name.to_lowercase();
        for req in &self.required {
            if lower.contains(&req.to_lowercase()) {
                self.satisfied.insert(req.clone());
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.required.iter().all(|r| self.satisfied.contains(r))
    }

    pub fn missing(&self) -> Vec<String> {
        self.required
            .iter()
            .filter(|r| !self.satisfied.contains(*r))
            .cloned()
            .collect()
    }

    /// The nudge text appended when the model tries to finish (or write)
    /// before gathering is complete (spec.md §4.1 step 6 "append a nudge
    /// message listing missing sources").
    pub fn nudge_text(&self) -> String {
        format!(
            "Before finishing or writing anything, you still need to call: {}.",
            self.missing().join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathering_guard_tracks_partial_completion() {
        let skill = Skill::new("Weekly Brief", vec!["summarize".into()])
            .with_required_sources(vec!["notion_search".into(), "gmail_search".into()]);
        let mut guard = GatheringGuard::for_skill(&skill).expect("required sources present");
        assert!(!guard.is_complete());
        guard.record_success("mcp:notion_search");
        assert_eq!(guard.missing(), vec!["gmail_search".to_string()]);
        guard.record_success("gmail_search_v2");
        assert!(guard.is_complete());
    }

    #[test]
    fn no_required_sources_yields_no_guard() {
        let skill = Skill::new("Quick note", vec!["jot it down".into()]);
        assert!(GatheringGuard::for_skill(&skill).is_none());
    }
}
