//! Hotkey module for global key interception
//!
//! Classifies captured key events, owns the interception session, and
//! runs it on a dedicated listener thread.

mod capture;
mod classifier;
mod keys;
mod listener;
mod session;

pub use capture::{
    CaptureError, CaptureSession, EventHandler, PermissionProvider, TapControl, TapPlacement,
};
pub use classifier::{classify, CapturedEvent, Decision, EventKind};
pub use keys::{codes, TriggerKey};
pub use listener::{HotkeyError, HotkeyListener};
pub use session::{InterceptionSession, SessionError};
