//! State machine module for the interception session
//!
//! Provides an explicit state machine with four states:
//! - Unarmed: Initial state, no hook installed
//! - Armed: Hook installed and enabled
//! - Disabled: Suspended by the OS, re-armed immediately
//! - Stopped: Terminal, hook torn down

mod machine;

pub use machine::{DisableReason, SessionState};
