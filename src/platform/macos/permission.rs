//! Accessibility permission check

use crate::hotkey::PermissionProvider;

// Link to ApplicationServices framework for accessibility permissions
#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXIsProcessTrusted() -> bool;
}

/// Reports whether this process may install a filtering event tap
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessibilityPermission;

impl PermissionProvider for AccessibilityPermission {
    fn is_granted(&self) -> bool {
        unsafe { AXIsProcessTrusted() }
    }
}
