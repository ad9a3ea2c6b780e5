//! Platform bindings for the capture hook and input source switching
//!
//! Only macOS has an implementation. Elsewhere the daemon runs without a
//! hook and reports interception as unsupported.

#[cfg(target_os = "macos")]
pub mod macos;

/// Whether key interception can run on this target
pub fn is_supported() -> bool {
    cfg!(target_os = "macos")
}
