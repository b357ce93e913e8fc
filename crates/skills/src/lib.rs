//! Built-in skills for Pulse.
//!
//! Skills answer simple requests locally, before any model is called:
//! the current time, and a summary of the host system.

pub mod system_info;
pub mod time;

use pulse_core::skill::SkillRegistry;
use std::sync::Arc;

pub use system_info::SystemInfoSkill;
pub use time::TimeSkill;

/// Create a registry with all built-in skills, `time` first.
pub fn default_registry() -> SkillRegistry {
    let mut registry = SkillRegistry::new();
    registry.register(Arc::new(TimeSkill));
    registry.register(Arc::new(SystemInfoSkill::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_order() {
        let registry = default_registry();
        assert_eq!(registry.names(), ["time", "system_info"]);
    }

    #[test]
    fn routes_utterances_to_skills() {
        let registry = default_registry();
        assert_eq!(registry.find("Hey, WHAT TIME IS IT?").unwrap().name(), "time");
        assert_eq!(registry.find("give me the system status please").unwrap().name(), "system_info");
        assert!(registry.find("tell me a joke").is_none());
    }
}
