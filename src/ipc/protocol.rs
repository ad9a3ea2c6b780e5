//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::SwitchEvent;
use crate::state::SessionState;

/// Interception session state as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No hook installed (not started, or permission missing)
    #[default]
    Unarmed,
    /// Trigger presses are being intercepted
    Armed,
    /// Suspended by the OS, about to be re-armed
    Disabled,
    /// Torn down for good
    Stopped,
}

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Request the cycling ring
    ListSources,

    /// Switch to the next source, as a trigger press would
    Cycle,

    /// Re-scan installed input sources
    Rediscover,

    /// Retry arming the session (e.g. after granting permission)
    Start,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to engine notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Cycling ring in order, with the cursor
    Sources {
        names: Vec<String>,
        current: Option<usize>,
    },

    /// A cycle request switched the active source
    Switched { name: String },

    /// Discovery re-ran
    Rediscovered { count: usize },

    /// Session armed
    Started,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// An engine event occurred
    Event { event: SwitchEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    pub session: SessionStatus,

    /// Display name of the source under the cursor
    pub current_source: Option<String>,

    /// Display names of the cycling ring
    pub sources: Vec<String>,

    pub trigger_key_code: u16,

    /// Confirmed switches since startup
    pub switch_count: u64,

    /// Cycles where every candidate was rejected
    pub failed_switch_count: u64,

    /// Times the OS disabled the hook and it was re-enabled
    pub rearm_count: u64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn new(trigger_key_code: u16) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            session: SessionStatus::default(),
            current_source: None,
            sources: Vec::new(),
            trigger_key_code,
            switch_count: 0,
            failed_switch_count: 0,
            rearm_count: 0,
            uptime_secs: 0,
        }
    }
}

/// Convert internal SessionState to IPC SessionStatus
impl From<SessionState> for SessionStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Unarmed => SessionStatus::Unarmed,
            SessionState::Armed => SessionStatus::Armed,
            SessionState::Disabled(_) => SessionStatus::Disabled,
            SessionState::Stopped => SessionStatus::Stopped,
        }
    }
}
