//! Events module for engine notifications
//!
//! Structured events published on the broadcast channel whenever the
//! active input source or the interception session changes.

use serde::{Deserialize, Serialize};

use crate::state::DisableReason;

/// Events emitted by the switch executor and the interception session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchEvent {
    /// Discovery produced a fresh source ring
    SourcesDiscovered {
        /// Display names in ring order
        names: Vec<String>,
        /// Cursor position seeded from the active source
        current: Option<usize>,
    },

    /// The active input source changed after a confirmed switch
    SourceChanged {
        id: String,
        name: String,
        index: usize,
        /// Activation attempts it took, including the successful one
        attempts: usize,
    },

    /// Every candidate in the ring was rejected
    SwitchFailed { attempts: usize },

    /// Capture hook installed and enabled
    SessionArmed,

    /// The OS disabled the hook and it was re-enabled
    SessionRearmed { reason: DisableReason },

    /// Capture hook torn down
    SessionStopped,
}

impl std::fmt::Display for SwitchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchEvent::SourcesDiscovered { names, .. } => {
                write!(f, "SOURCES_DISCOVERED ({})", names.len())
            }
            SwitchEvent::SourceChanged { name, attempts, .. } => {
                write!(f, "SOURCE_CHANGED ({name}, {attempts} attempts)")
            }
            SwitchEvent::SwitchFailed { attempts } => {
                write!(f, "SWITCH_FAILED ({attempts} attempts)")
            }
            SwitchEvent::SessionArmed => write!(f, "SESSION_ARMED"),
            SwitchEvent::SessionRearmed { reason } => write!(f, "SESSION_REARMED ({reason})"),
            SwitchEvent::SessionStopped => write!(f, "SESSION_STOPPED"),
        }
    }
}
