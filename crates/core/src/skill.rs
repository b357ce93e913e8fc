//! Skill trait — short-circuit responders matched before inference.
//!
//! A skill owns a handful of trigger phrases. When one occurs anywhere in an
//! utterance (case-insensitive), the skill answers and the model is never
//! called.

use std::sync::Arc;

/// The core Skill trait.
pub trait Skill: Send + Sync {
    /// The unique name of this skill (e.g., "time"). Recorded with its replies.
    fn name(&self) -> &str;

    /// A description of what this skill does.
    fn description(&self) -> &str;

    /// Phrases that select this skill.
    fn triggers(&self) -> &[&str];

    /// Produce the reply for the given utterance.
    fn execute(&self, input: &str) -> String;

    /// Whether any trigger occurs in `input`, ignoring case.
    fn matches(&self, input: &str) -> bool {
        let input = input.to_lowercase();
        self.triggers()
            .iter()
            .any(|trigger| input.contains(&trigger.to_lowercase()))
    }
}

/// An ordered registry of skills.
///
/// Lookup walks skills in registration order and the first match wins.
#[derive(Clone, Default)]
pub struct SkillRegistry {
    skills: Vec<Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self { skills: Vec::new() }
    }

    /// Append a skill after every already registered one.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        self.skills.push(skill);
    }

    pub fn with(mut self, skill: Arc<dyn Skill>) -> Self {
        self.register(skill);
        self
    }

    /// First registered skill whose triggers match `input`.
    pub fn find(&self, input: &str) -> Option<Arc<dyn Skill>> {
        self.skills.iter().find(|s| s.matches(input)).cloned()
    }

    /// Registered skill names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.skills.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("skills", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test skill for unit tests.
    struct EchoSkill {
        name: &'static str,
        triggers: Vec<&'static str>,
    }

    impl Skill for EchoSkill {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn triggers(&self) -> &[&str] {
            &self.triggers
        }
        fn execute(&self, input: &str) -> String {
            format!("{}: {}", self.name, input)
        }
    }

    fn echo(name: &'static str, triggers: &[&'static str]) -> Arc<dyn Skill> {
        Arc::new(EchoSkill {
            name,
            triggers: triggers.to_vec(),
        })
    }

    #[test]
    fn match_is_case_insensitive_substring() {
        let skill = echo("time", &["What Time Is It"]);
        assert!(skill.matches("hey, WHAT TIME IS IT now?"));
        assert!(!skill.matches("what's the time"));
    }

    #[test]
    fn first_registered_match_wins() {
        let registry = SkillRegistry::new()
            .with(echo("first", &["status"]))
            .with(echo("second", &["system status"]));

        let hit = registry.find("show system status").unwrap();
        assert_eq!(hit.name(), "first");
        assert_eq!(registry.names(), vec!["first", "second"]);
    }

    #[test]
    fn no_match_returns_none() {
        let registry = SkillRegistry::new().with(echo("time", &["current time"]));
        assert!(registry.find("tell me a joke").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_registry() {
        let registry = SkillRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.find("anything").is_none());
    }
}
