//! Skill registry feeding the agent loop's gathering guard (spec.md
//! glossary "Skill", §4.1 "Gathering guard").
//!
//! Skills themselves live as named blocks on the host's Skills page
//! (spec.md §1 non-goal: the markdown format is host content, not this
//! crate's concern). This module only resolves a skill by name and hands
//! back its ordered instructions plus required-source list — everything
//! the agent loop needs to drive `cos_get_skill` and the gathering guard.

pub mod skill_metadata;

pub use skill_metadata::{GatheringGuard, Skill, SkillSnapshot};

use std::sync::RwLock;

/// In-memory registry over the current `SkillSnapshot`, refreshed whenever
/// the host's Skills page changes (spec.md §4.3 skills section cache).
pub struct SkillRegistry {
    snapshot: RwLock<SkillSnapshot>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(SkillSnapshot::default()),
        }
    }

    pub fn replace_snapshot(&self, snapshot: SkillSnapshot) {
        *self.snapshot.write().expect("skill snapshot lock poisoned") = snapshot;
    }

    pub fn find(&self, name: &str) -> Option<Skill> {
        self.snapshot
            .read()
            .expect("skill snapshot lock poisoned")
            .find(name)
            .cloned()
    }

    /// One-line-per-skill index for the context pipeline's `skills` section.
    pub fn index(&self) -> String {
        self.snapshot.read().expect("skill snapshot lock poisoned").index()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
