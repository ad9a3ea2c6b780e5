//! macOS bindings: CGEventTap capture, TIS input sources, and the
//! Accessibility permission check

mod permission;
mod tap;
mod tis;

pub use permission::AccessibilityPermission;
pub use tap::EventTap;
pub use tis::TisProvider;
