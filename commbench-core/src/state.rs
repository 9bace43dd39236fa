// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Connection state machine with typed state transitions.
//!
//! Implements the connection lifecycle:
//! Disconnected → Connecting → Connected → BackingOff → Connecting → ...
//! Invalid transitions result in StateTransitionError.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::StateTransitionError;
use crate::types::BackendKind;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No channel and no attempt in progress. Initial and terminal state.
    Disconnected,

    /// A connect attempt is in flight.
    Connecting,

    /// A usable channel exists.
    Connected,

    /// Waiting out the backoff delay before the next attempt.
    BackingOff,
}

impl ConnectionState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::BackingOff => "BackingOff",
        }
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        matches!(
            (self, target),
            // From Disconnected
            (Self::Disconnected, Self::Connecting) |
            // From Connecting
            (Self::Connecting, Self::Connected) |
            (Self::Connecting, Self::BackingOff) |
            (Self::Connecting, Self::Disconnected) |
            // From Connected
            (Self::Connected, Self::BackingOff) |
            (Self::Connected, Self::Disconnected) |
            // From BackingOff
            (Self::BackingOff, Self::Connecting) |
            (Self::BackingOff, Self::Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one backend connection.
/// Enforces valid state transitions and tracks timing metrics.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    backend: BackendKind,
    current_state: ConnectionState,
    last_transition: Instant,
    transition_count: u64,
}

impl ConnectionStateMachine {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            current_state: ConnectionState::Disconnected,
            last_transition: Instant::now(),
            transition_count: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Get time since last transition.
    pub fn time_in_current_state(&self) -> std::time::Duration {
        self.last_transition.elapsed()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new state.
    /// Returns Ok(()) if successful, or StateTransitionError if invalid.
    pub fn transition_to(&mut self, target: ConnectionState) -> Result<(), StateTransitionError> {
        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                backend: self.backend,
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            backend = %self.backend,
            from = self.current_state.name(),
            to = target.name(),
            "Connection state transition"
        );

        self.current_state = target;
        self.last_transition = Instant::now();
        self.transition_count += 1;

        Ok(())
    }

    /// Whether a channel can be handed out without connecting first.
    pub fn is_usable(&self) -> bool {
        self.current_state == ConnectionState::Connected
    }
}

/// Point-in-time view of a connection, used by `list` and the logs.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub backend: String,
    pub current_state: String,
    pub time_in_state_ms: u64,
    pub transition_count: u64,
}

impl From<&ConnectionStateMachine> for ConnectionSnapshot {
    fn from(sm: &ConnectionStateMachine) -> Self {
        Self {
            backend: sm.backend.to_string(),
            current_state: sm.current_state.name().to_string(),
            time_in_state_ms: sm.time_in_current_state().as_millis() as u64,
            transition_count: sm.transition_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = ConnectionStateMachine::new(BackendKind::Redis);
        assert_eq!(sm.state(), ConnectionState::Disconnected);
        assert_eq!(sm.transition_count(), 0);
        assert!(!sm.is_usable());
    }

    #[test]
    fn test_reconnect_cycle() {
        let mut sm = ConnectionStateMachine::new(BackendKind::Kafka);

        assert!(sm.transition_to(ConnectionState::Connecting).is_ok());
        assert!(sm.transition_to(ConnectionState::BackingOff).is_ok());
        assert!(sm.transition_to(ConnectionState::Connecting).is_ok());
        assert!(sm.transition_to(ConnectionState::Connected).is_ok());
        assert!(sm.is_usable());

        // Channel lost
        assert!(sm.transition_to(ConnectionState::BackingOff).is_ok());
        assert!(sm.transition_to(ConnectionState::Connecting).is_ok());
        assert!(sm.transition_to(ConnectionState::Disconnected).is_ok());
        assert_eq!(sm.transition_count(), 7);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut sm = ConnectionStateMachine::new(BackendKind::RabbitMq);

        // Disconnected → Connected (must connect first)
        let result = sm.transition_to(ConnectionState::Connected);
        assert!(result.is_err());

        // Disconnected → BackingOff
        assert!(sm.transition_to(ConnectionState::BackingOff).is_err());

        sm.transition_to(ConnectionState::Connecting).unwrap();
        sm.transition_to(ConnectionState::Connected).unwrap();

        // Connected → Connecting skips the backoff
        assert!(sm.transition_to(ConnectionState::Connecting).is_err());
        assert_eq!(sm.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_snapshot() {
        let mut sm = ConnectionStateMachine::new(BackendKind::Memory);
        sm.transition_to(ConnectionState::Connecting).unwrap();
        let snapshot = ConnectionSnapshot::from(&sm);
        assert_eq!(snapshot.backend, "memory");
        assert_eq!(snapshot.current_state, "Connecting");
        assert_eq!(snapshot.transition_count, 1);
    }
}
