//! System info skill: reports the host OS, CPU load and memory use.

use pulse_core::skill::Skill;
use std::sync::Mutex;
use std::time::Instant;
use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, System};
use tracing::{debug, warn};

const TRIGGERS: &[&str] = &[
    "system status",
    "cpu usage",
    "ram usage",
    "how is the system",
    "system info",
];

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

struct Sampler {
    sys: System,
    cpu_sampled: Instant,
}

/// Reports `OS: .. | CPU Usage: ..% | Memory Usage: ..% (..GB / ..GB)`.
///
/// CPU usage is measured between two refreshes. The first refresh happens at
/// construction, so a skill built well before it is asked never waits.
pub struct SystemInfoSkill {
    sampler: Mutex<Sampler>,
}

impl SystemInfoSkill {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self {
            sampler: Mutex::new(Sampler {
                sys,
                cpu_sampled: Instant::now(),
            }),
        }
    }

    fn os_segment() -> String {
        let name = System::name().unwrap_or_else(|| std::env::consts::OS.to_string());
        match System::kernel_version() {
            Some(release) => format!("OS: {name} {release}"),
            None => format!("OS: {name} {}", std::env::consts::ARCH),
        }
    }

    fn segments(&self) -> Vec<String> {
        let mut info = vec![Self::os_segment()];

        let Ok(mut sampler) = self.sampler.lock() else {
            warn!("System sampler poisoned, reporting OS only");
            return info;
        };

        let since = sampler.cpu_sampled.elapsed();
        if since < MINIMUM_CPU_UPDATE_INTERVAL {
            std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL - since);
        }
        sampler.sys.refresh_cpu_usage();
        sampler.cpu_sampled = Instant::now();
        info.push(format!("CPU Usage: {:.1}%", sampler.sys.global_cpu_usage()));

        sampler.sys.refresh_memory();
        let total = sampler.sys.total_memory();
        let used = sampler.sys.used_memory();
        if total == 0 {
            debug!("Total memory unavailable");
        } else {
            info.push(format!(
                "Memory Usage: {:.1}% ({:.1}GB / {:.1}GB)",
                used as f64 / total as f64 * 100.0,
                used as f64 / GIB,
                total as f64 / GIB
            ));
        }
        info
    }
}

impl Default for SystemInfoSkill {
    fn default() -> Self {
        Self::new()
    }
}

impl Skill for SystemInfoSkill {
    fn name(&self) -> &str {
        "system_info"
    }

    fn description(&self) -> &str {
        "Provides system status information (CPU, RAM)."
    }

    fn triggers(&self) -> &[&str] {
        TRIGGERS
    }

    fn execute(&self, _input: &str) -> String {
        self.segments().join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_os_cpu_and_memory() {
        let out = SystemInfoSkill::new().execute("system info");
        let segments: Vec<&str> = out.split(" | ").collect();
        assert!(segments[0].starts_with("OS: "));
        assert!(segments[1].starts_with("CPU Usage: "));
        assert!(segments[1].ends_with('%'));
        assert!(segments[2].starts_with("Memory Usage: "));
        assert!(segments[2].contains("GB / "));
    }

    #[test]
    fn repeated_calls_keep_the_format() {
        let skill = SystemInfoSkill::new();
        skill.execute("cpu usage");
        assert!(skill.execute("ram usage").contains("Memory Usage: "));
    }

    #[test]
    fn triggers_ignore_case() {
        let skill = SystemInfoSkill::default();
        assert!(skill.matches("What's my CPU Usage?"));
        assert!(skill.matches("how much RAM USAGE now"));
        assert!(!skill.matches("what time is it"));
    }
}
