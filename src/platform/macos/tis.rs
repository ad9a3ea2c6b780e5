//! Text Input Sources provider backed by the Carbon TIS API

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;

use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFType, CFTypeRef, TCFType};
use core_foundation::boolean::{CFBoolean, CFBooleanRef};
use core_foundation::dictionary::CFDictionaryRef;
use core_foundation::string::{CFString, CFStringRef};
use tracing::warn;

use crate::sources::{
    ActivationError, InputSource, InputSourceProvider, SourceCategory, SourceId, SourceKind,
};

type TISInputSourceRef = CFTypeRef;
type OSStatus = i32;

const NO_ERR: OSStatus = 0;

#[link(name = "Carbon", kind = "framework")]
extern "C" {
    fn TISCreateInputSourceList(
        properties: CFDictionaryRef,
        include_all_installed: u8,
    ) -> CFArrayRef;
    fn TISCopyCurrentKeyboardInputSource() -> TISInputSourceRef;
    fn TISGetInputSourceProperty(source: TISInputSourceRef, key: CFStringRef) -> *const c_void;
    fn TISSelectInputSource(source: TISInputSourceRef) -> OSStatus;

    static kTISPropertyInputSourceID: CFStringRef;
    static kTISPropertyLocalizedName: CFStringRef;
    static kTISPropertyInputSourceIsEnabled: CFStringRef;
    static kTISPropertyInputSourceIsSelectCapable: CFStringRef;
    static kTISPropertyInputSourceCategory: CFStringRef;
    static kTISPropertyInputSourceType: CFStringRef;
}

/// Provider over the system's enabled input sources.
///
/// Keeps a retained handle per source from the last `list` so that
/// `activate` can select by identity.
#[derive(Default)]
pub struct TisProvider {
    handles: RefCell<HashMap<SourceId, CFType>>,
}

impl TisProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputSourceProvider for TisProvider {
    fn list(&self) -> Vec<InputSource> {
        let array = unsafe { TISCreateInputSourceList(ptr::null(), 0) };
        if array.is_null() {
            warn!("TISCreateInputSourceList returned no list");
            return Vec::new();
        }
        let array: CFArray<CFType> = unsafe { CFArray::wrap_under_create_rule(array) };

        let mut handles = self.handles.borrow_mut();
        handles.clear();

        let mut sources = Vec::with_capacity(array.len() as usize);
        for item in array.iter() {
            let handle = unsafe { CFType::wrap_under_get_rule(item.as_CFTypeRef()) };
            let Some(source) = (unsafe { describe(handle.as_CFTypeRef()) }) else {
                continue;
            };
            handles.insert(source.id.clone(), handle);
            sources.push(source);
        }
        sources
    }

    fn activate(&self, id: &SourceId) -> Result<(), ActivationError> {
        let handles = self.handles.borrow();
        let handle = handles
            .get(id)
            .ok_or_else(|| ActivationError::UnknownSource(id.clone()))?;

        match unsafe { TISSelectInputSource(handle.as_CFTypeRef()) } {
            NO_ERR => Ok(()),
            status => Err(ActivationError::Rejected(status)),
        }
    }

    fn query_active(&self) -> Option<SourceId> {
        let current = unsafe { TISCopyCurrentKeyboardInputSource() };
        if current.is_null() {
            return None;
        }
        let current = unsafe { CFType::wrap_under_create_rule(current) };
        unsafe { string_property(current.as_CFTypeRef(), kTISPropertyInputSourceID) }.map(SourceId)
    }
}

/// Snapshot one TIS source; `None` when it has no identity
unsafe fn describe(source: TISInputSourceRef) -> Option<InputSource> {
    let id = string_property(source, kTISPropertyInputSourceID)?;
    let name = string_property(source, kTISPropertyLocalizedName)
        .unwrap_or_else(|| "Unknown".to_string());

    Some(InputSource {
        id: SourceId(id),
        name,
        enabled: bool_property(source, kTISPropertyInputSourceIsEnabled).unwrap_or(false),
        // Sources that don't report these are treated like keyboard layouts
        selectable: bool_property(source, kTISPropertyInputSourceIsSelectCapable)
            .unwrap_or(true),
        category: string_property(source, kTISPropertyInputSourceCategory)
            .map_or(SourceCategory::Keyboard, |c| parse_category(&c)),
        kind: string_property(source, kTISPropertyInputSourceType)
            .map_or(SourceKind::Other, |t| parse_kind(&t)),
    })
}

unsafe fn string_property(source: TISInputSourceRef, key: CFStringRef) -> Option<String> {
    let value = TISGetInputSourceProperty(source, key);
    (!value.is_null()).then(|| CFString::wrap_under_get_rule(value as CFStringRef).to_string())
}

unsafe fn bool_property(source: TISInputSourceRef, key: CFStringRef) -> Option<bool> {
    let value = TISGetInputSourceProperty(source, key);
    (!value.is_null()).then(|| bool::from(CFBoolean::wrap_under_get_rule(value as CFBooleanRef)))
}

fn parse_category(value: &str) -> SourceCategory {
    match value {
        "TISCategoryKeyboardInputSource" => SourceCategory::Keyboard,
        "TISCategoryPaletteInputSource" => SourceCategory::Palette,
        "TISCategoryInkInputSource" => SourceCategory::Ink,
        _ => SourceCategory::Other,
    }
}

fn parse_kind(value: &str) -> SourceKind {
    match value {
        "TISTypeKeyboardLayout" => SourceKind::Layout,
        "TISTypeKeyboardInputMode" => SourceKind::InputMode,
        "TISTypeKeyboardInputMethodWithoutModes" | "TISTypeKeyboardInputMethodModeEnabled" => {
            SourceKind::InputMethod
        }
        _ => SourceKind::Other,
    }
}
