//! Narrow interfaces over the OS capture hook and its permission check

use super::classifier::{CapturedEvent, Decision};

/// Where the hook is inserted relative to other taps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapPlacement {
    HeadInsert,
    TailAppend,
}

impl TapPlacement {
    /// Placement strategies in the order they are attempted
    pub const FALLBACK_ORDER: [TapPlacement; 2] =
        [TapPlacement::HeadInsert, TapPlacement::TailAppend];
}

impl std::fmt::Display for TapPlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapPlacement::HeadInsert => write!(f, "head-insert"),
            TapPlacement::TailAppend => write!(f, "tail-append"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("event tap rejected at {0} placement")]
    Rejected(TapPlacement),

    #[error("failed to attach event tap to run loop")]
    RunLoopSource,
}

/// Handle passed into the event handler so it can re-enable the hook from
/// inside the callback that reported the disablement
pub trait TapControl {
    fn set_enabled(&self, enabled: bool);
}

/// Handler invoked for every captured event, on the run-loop thread
pub type EventHandler = Box<dyn FnMut(&CapturedEvent, &dyn TapControl) -> Decision>;

/// The live OS capture hook
pub trait CaptureSession {
    /// Install and enable the hook; captured events go to `handler`
    fn install(
        &mut self,
        placement: TapPlacement,
        handler: EventHandler,
    ) -> Result<(), CaptureError>;

    fn set_enabled(&self, enabled: bool);

    /// Disable and remove the hook. No-op when nothing is installed.
    fn uninstall(&mut self);

    fn is_installed(&self) -> bool;
}

/// Elevated input-capture permission check
pub trait PermissionProvider {
    fn is_granted(&self) -> bool;
}
