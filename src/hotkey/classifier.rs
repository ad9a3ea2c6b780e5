//! Pure classification of captured events

use crate::state::DisableReason;

use super::keys::TriggerKey;

/// Kind of event delivered by the capture hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    FlagsChanged,
    /// Meta-signal: the OS suspended the hook
    TapDisabled(DisableReason),
    Other,
}

/// A captured event, reduced to what classification needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedEvent {
    pub kind: EventKind,
    pub key_code: u16,
}

impl CapturedEvent {
    pub fn key_down(key_code: u16) -> Self {
        Self { kind: EventKind::KeyDown, key_code }
    }

    pub fn key_up(key_code: u16) -> Self {
        Self { kind: EventKind::KeyUp, key_code }
    }

    pub fn tap_disabled(reason: DisableReason) -> Self {
        Self { kind: EventKind::TapDisabled(reason), key_code: 0 }
    }
}

/// What to do with a captured event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Trigger press: switch sources and withhold the event
    Suppress,
    /// Forward the event unmodified
    PassThrough,
    /// The hook was disabled: re-enable it, nothing to forward
    Rearm,
}

/// Decide what to do with an event. Acts on presses only, so a
/// press+release of the trigger switches once.
pub fn classify(kind: EventKind, key_code: u16, trigger: TriggerKey) -> Decision {
    match kind {
        EventKind::TapDisabled(_) => Decision::Rearm,
        EventKind::KeyDown if trigger.matches(key_code) => Decision::Suppress,
        _ => Decision::PassThrough,
    }
}
