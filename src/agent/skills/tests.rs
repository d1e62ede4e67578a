//! Unit tests for the trimmed skill registry.

use super::*;

#[test]
fn registry_resolves_skill_by_case_insensitive_name() {
    let registry = SkillRegistry::new();
    let snapshot = SkillSnapshot {
        version: "1".to_string(),
        skills: vec![Skill::new("Weekly Brief", vec!["gather sources".into(), "summarize".into()])],
    };
    registry.replace_snapshot(snapshot);

    let found = registry.find("weekly brief").expect("skill should resolve");
    assert_eq!(found.name, "Weekly Brief");
    assert_eq!(found.instructions.len(), 2);
}

#[test]
fn registry_index_lists_one_line_per_skill() {
    let registry = SkillRegistry::new();
    registry.replace_snapshot(SkillSnapshot {
        version: "1".to_string(),
        skills: vec![
            Skill::new("Weekly Brief", vec!["summarize".into()]),
            Skill::new("Inbox Zero", vec!["triage".into()]),
        ],
    });

    let index = registry.index();
    assert!(index.contains("Weekly Brief"));
    assert!(index.contains("Inbox Zero"));
}

#[test]
fn missing_skill_resolves_to_none() {
    let registry = SkillRegistry::new();
    assert!(registry.find("nonexistent").is_none());
}
