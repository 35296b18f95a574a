//! Listening lifecycle: Stopped ⇄ Listening, with a watch channel for observers.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ListenState {
    Stopped,
    Listening,
}

impl std::fmt::Display for ListenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenState::Stopped => write!(f, "Stopped"),
            ListenState::Listening => write!(f, "Listening"),
        }
    }
}

impl ListenState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: ListenState) -> bool {
        matches!(
            (self, next),
            (ListenState::Stopped, ListenState::Listening)
                | (ListenState::Listening, ListenState::Stopped)
        )
    }
}

/// Thread-safe lifecycle state with reactive subscribers.
pub struct ListenStateMachine {
    state: RwLock<ListenState>,
    state_tx: watch::Sender<ListenState>,
}

impl ListenStateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ListenState::Stopped);
        Self {
            state: RwLock::new(ListenState::Stopped),
            state_tx,
        }
    }

    pub fn current(&self) -> ListenState {
        *self.state.read()
    }

    pub fn is_listening(&self) -> bool {
        self.current() == ListenState::Listening
    }

    /// Attempt a state transition. Returns Ok(new_state) or Err with reason.
    pub fn transition(&self, next: ListenState) -> Result<ListenState, String> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            let msg = format!("invalid transition: {} -> {}", current, next);
            warn!("{}", msg);
            return Err(msg);
        }
        *state = next;
        self.state_tx.send_replace(next);
        info!(from = %current, to = %next, "listen_state_transition");
        Ok(next)
    }

    /// Force Stopped from any state (teardown path).
    pub fn force_stop(&self) {
        let mut state = self.state.write();
        let prev = *state;
        *state = ListenState::Stopped;
        self.state_tx.send_replace(ListenState::Stopped);
        if prev != ListenState::Stopped {
            info!(from = %prev, "force_stop");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ListenState> {
        self.state_tx.subscribe()
    }
}

impl Default for ListenStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = ListenStateMachine::new();
        assert_eq!(sm.current(), ListenState::Stopped);
        assert_eq!(sm.transition(ListenState::Listening), Ok(ListenState::Listening));
        assert!(sm.is_listening());
        assert_eq!(sm.transition(ListenState::Stopped), Ok(ListenState::Stopped));
    }

    #[test]
    fn test_self_transition_rejected() {
        let sm = ListenStateMachine::new();
        assert!(sm.transition(ListenState::Stopped).is_err());
        sm.transition(ListenState::Listening).unwrap();
        assert!(sm.transition(ListenState::Listening).is_err());
    }

    #[test]
    fn test_subscribers_see_changes() {
        let sm = ListenStateMachine::new();
        let mut rx = sm.subscribe();
        assert_eq!(*rx.borrow(), ListenState::Stopped);
        sm.transition(ListenState::Listening).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ListenState::Listening);
        sm.force_stop();
        assert_eq!(*rx.borrow_and_update(), ListenState::Stopped);
    }
}
