//! Tells the current local date and time.

use chrono::{DateTime, Local, TimeZone};
use pulse_core::skill::Skill;

const TRIGGERS: &[&str] = &[
    "what time is it",
    "what is the time",
    "current time",
    "what date is it",
    "what is the date",
];

pub struct TimeSkill;

impl TimeSkill {
    /// The reply for a given instant, e.g. `It is currently Monday, March 04, 02:30 PM.`
    pub fn describe<Tz: TimeZone>(now: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!("It is currently {}.", now.format("%A, %B %d, %I:%M %p"))
    }
}

impl Skill for TimeSkill {
    fn name(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "Tells the current date and time."
    }

    fn triggers(&self) -> &[&str] {
        TRIGGERS
    }

    fn execute(&self, _input: &str) -> String {
        Self::describe(&Local::now())
    }
}
