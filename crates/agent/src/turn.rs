//! The state machine one conversational turn walks through.
//!
//! ```text
//! Idle ──UserStored──▶ Logged ──SkillMatched──▶ Handled
//!                        │
//!                        └──ContextReady──▶ ContextBuilt ──InferenceStarted──▶ Inferring ──Finished──▶ Completed
//!
//! any non-terminal state ──Failed──▶ Aborted
//! ```

use std::fmt;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    /// The user message is durably stored
    Logged,
    /// A skill answered
    Handled,
    ContextBuilt,
    Inferring,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    UserStored,
    SkillMatched,
    ContextReady,
    InferenceStarted,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid turn transition: {event:?} in state {state:?}")]
pub struct InvalidTransition {
    pub state: TurnState,
    pub event: TurnEvent,
}

impl TurnState {
    /// The transition function. Terminal states accept no events.
    pub fn on(self, event: TurnEvent) -> Result<TurnState, InvalidTransition> {
        use TurnEvent::*;
        use TurnState::*;

        match (self, event) {
            (Idle, UserStored) => Ok(Logged),
            (Logged, SkillMatched) => Ok(Handled),
            (Logged, ContextReady) => Ok(ContextBuilt),
            (ContextBuilt, InferenceStarted) => Ok(Inferring),
            (Inferring, Finished) => Ok(Completed),
            (Idle | Logged | ContextBuilt | Inferring, Failed) => Ok(Aborted),
            (state, event) => Err(InvalidTransition { state, event }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Handled | TurnState::Completed | TurnState::Aborted)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Logged => "logged",
            TurnState::Handled => "handled",
            TurnState::ContextBuilt => "context_built",
            TurnState::Inferring => "inferring",
            TurnState::Completed => "completed",
            TurnState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One tracked turn.
#[derive(Debug)]
pub struct Turn {
    id: Uuid,
    state: TurnState,
    started: Instant,
}

impl Turn {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TurnState::Idle,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Apply `event`. An invalid transition is logged and leaves the state unchanged.
    pub fn advance(&mut self, event: TurnEvent) -> TurnState {
        match self.state.on(event) {
            Ok(next) => {
                debug!(turn_id = %self.id, from = %self.state, to = %next, "Turn transition");
                self.state = next;
            }
            Err(e) => warn!(turn_id = %self.id, error = %e, "Ignoring turn event"),
        }
        self.state
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_path() {
        let mut turn = Turn::new();
        assert_eq!(turn.advance(TurnEvent::UserStored), TurnState::Logged);
        assert_eq!(turn.advance(TurnEvent::ContextReady), TurnState::ContextBuilt);
        assert_eq!(turn.advance(TurnEvent::InferenceStarted), TurnState::Inferring);
        assert_eq!(turn.advance(TurnEvent::Finished), TurnState::Completed);
        assert!(turn.state().is_terminal());
    }

    #[test]
    fn skill_path() {
        let state = TurnState::Idle
            .on(TurnEvent::UserStored)
            .and_then(|s| s.on(TurnEvent::SkillMatched))
            .unwrap();
        assert_eq!(state, TurnState::Handled);
        assert!(state.is_terminal());
    }

    #[test]
    fn failures_abort_from_any_live_state() {
        for state in [
            TurnState::Idle,
            TurnState::Logged,
            TurnState::ContextBuilt,
            TurnState::Inferring,
        ] {
            assert_eq!(state.on(TurnEvent::Failed), Ok(TurnState::Aborted));
        }
    }

    #[test]
    fn terminal_states_reject_events() {
        let err = TurnState::Completed.on(TurnEvent::Failed).unwrap_err();
        assert_eq!(err.state, TurnState::Completed);
        assert!(TurnState::Handled.on(TurnEvent::ContextReady).is_err());
        assert!(TurnState::Idle.on(TurnEvent::Finished).is_err());
    }

    #[test]
    fn invalid_event_keeps_state() {
        let mut turn = Turn::new();
        assert_eq!(turn.advance(TurnEvent::InferenceStarted), TurnState::Idle);
    }
}
