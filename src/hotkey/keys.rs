//! Trigger key definitions
//!
//! Provides the virtual key codes the daemon knows about and a small
//! wrapper for the configured trigger.

use serde::{Deserialize, Serialize};

/// Virtual key codes as delivered in keyboard events
pub mod codes {
    /// Globe / fn key on Apple keyboards when delivered as a key press
    pub const GLOBE: u16 = 179;

    /// Narrow a raw event key code; out-of-range values map to `u16::MAX`
    /// so they can never alias a real key
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    pub fn from_raw(raw: i64) -> u16 {
        u16::try_from(raw).unwrap_or(u16::MAX)
    }
}

/// The single key whose press cycles input sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerKey(u16);

impl TriggerKey {
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    /// Check if a captured key code is the trigger
    pub fn matches(&self, key_code: u16) -> bool {
        self.0 == key_code
    }
}

impl Default for TriggerKey {
    fn default() -> Self {
        Self(codes::GLOBE)
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            codes::GLOBE => write!(f, "globe ({})", self.0),
            code => write!(f, "key code {code}"),
        }
    }
}
