//! Interception session state machine
//!
//! Tracks the lifecycle of the capture hook: Unarmed, Armed,
//! Disabled (by timeout or user input), and the terminal Stopped state.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Why the OS suspended the capture hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    /// The callback took too long to return
    Timeout,
    /// Another process took control of input (e.g. secure input)
    UserInput,
}

impl std::fmt::Display for DisableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisableReason::Timeout => write!(f, "timeout"),
            DisableReason::UserInput => write!(f, "user input"),
        }
    }
}

/// The possible states of the interception session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No hook installed yet
    #[default]
    Unarmed,
    /// Hook installed and enabled, events are flowing
    Armed,
    /// The OS suspended the hook; re-armed on the same callback
    Disabled(DisableReason),
    /// Hook torn down, no further transitions
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unarmed => write!(f, "Unarmed"),
            SessionState::Armed => write!(f, "Armed"),
            SessionState::Disabled(reason) => write!(f, "Disabled({reason})"),
            SessionState::Stopped => write!(f, "Stopped"),
        }
    }
}

impl SessionState {
    /// Whether no transition out of this state is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }

    /// Whether a hook is currently installed (enabled or suspended)
    pub fn has_hook(&self) -> bool {
        matches!(self, SessionState::Armed | SessionState::Disabled(_))
    }

    /// Transition after the hook was installed or re-enabled.
    ///
    /// Returns the new state; Stopped stays Stopped.
    pub fn arm(self) -> SessionState {
        match self {
            SessionState::Stopped => {
                warn!("ignoring arm request on stopped session");
                self
            }
            _ => {
                debug!(from = %self, "session armed");
                SessionState::Armed
            }
        }
    }

    /// Transition after the OS reported the hook as disabled.
    ///
    /// Only an armed hook can be disabled.
    pub fn disable(self, reason: DisableReason) -> SessionState {
        match self {
            SessionState::Armed | SessionState::Disabled(_) => SessionState::Disabled(reason),
            other => other,
        }
    }

    /// Transition to the terminal state. Valid from every state.
    pub fn stop(self) -> SessionState {
        SessionState::Stopped
    }
}
