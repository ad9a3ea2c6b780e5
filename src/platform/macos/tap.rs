//! CGEventTap binding for the capture session
//!
//! The tap is created on the calling thread's run loop. The Rust handler is
//! boxed and handed to the C callback as `user_info`; it never leaves this
//! module.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use core_foundation::base::TCFType;
use core_foundation::mach_port::{CFMachPort, CFMachPortRef};
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop, CFRunLoopSource};
use core_graphics::event::{
    CGEventField, CGEventMask, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
    CGEventType, EventField,
};
use core_graphics::sys::CGEventRef;
use tracing::{debug, error};

use crate::hotkey::{
    codes, CaptureError, CaptureSession, CapturedEvent, Decision, EventHandler, EventKind,
    TapControl, TapPlacement,
};
use crate::state::DisableReason;

type TapCallback = unsafe extern "C" fn(
    proxy: *const c_void,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef;

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: CGEventTapLocation,
        place: CGEventTapPlacement,
        options: CGEventTapOptions,
        events_of_interest: CGEventMask,
        callback: TapCallback,
        user_info: *mut c_void,
    ) -> CFMachPortRef;

    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

    fn CGEventGetIntegerValueField(event: CGEventRef, field: CGEventField) -> i64;
}

const KEY_DOWN: u32 = CGEventType::KeyDown as u32;
const KEY_UP: u32 = CGEventType::KeyUp as u32;
const FLAGS_CHANGED: u32 = CGEventType::FlagsChanged as u32;
const TAP_DISABLED_BY_TIMEOUT: u32 = CGEventType::TapDisabledByTimeout as u32;
const TAP_DISABLED_BY_USER_INPUT: u32 = CGEventType::TapDisabledByUserInput as u32;

/// Key presses only; tap-disabled notifications arrive regardless
const EVENT_MASK: CGEventMask = 1 << (CGEventType::KeyDown as u64);

struct TapContext {
    handler: RefCell<EventHandler>,
    port: Cell<CFMachPortRef>,
}

struct PortControl(CFMachPortRef);

impl TapControl for PortControl {
    fn set_enabled(&self, enabled: bool) {
        if !self.0.is_null() {
            unsafe { CGEventTapEnable(self.0, enabled) }
        }
    }
}

struct Installed {
    port: CFMachPort,
    source: CFRunLoopSource,
    run_loop: CFRunLoop,
    // Dropped last, after the port is released
    context: Box<TapContext>,
}

/// Session-level keyboard event tap
#[derive(Default)]
pub struct EventTap {
    installed: Option<Installed>,
}

impl EventTap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureSession for EventTap {
    fn install(
        &mut self,
        placement: TapPlacement,
        handler: EventHandler,
    ) -> Result<(), CaptureError> {
        self.uninstall();

        let context = Box::new(TapContext {
            handler: RefCell::new(handler),
            port: Cell::new(ptr::null_mut()),
        });
        let user_info = &*context as *const TapContext as *mut c_void;

        let raw = unsafe {
            CGEventTapCreate(
                CGEventTapLocation::Session,
                cg_placement(placement),
                CGEventTapOptions::Default,
                EVENT_MASK,
                tap_callback,
                user_info,
            )
        };
        if raw.is_null() {
            return Err(CaptureError::Rejected(placement));
        }
        context.port.set(raw);

        let port = unsafe { CFMachPort::wrap_under_create_rule(raw) };
        let source = match port.create_runloop_source(0) {
            Ok(source) => source,
            Err(()) => {
                unsafe { CGEventTapEnable(raw, false) };
                error!("failed to create run loop source for event tap");
                return Err(CaptureError::RunLoopSource);
            }
        };

        let run_loop = CFRunLoop::get_current();
        unsafe {
            run_loop.add_source(&source, kCFRunLoopCommonModes);
            CGEventTapEnable(raw, true);
        }
        debug!(%placement, "event tap attached to run loop");

        self.installed = Some(Installed {
            port,
            source,
            run_loop,
            context,
        });
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) {
        if let Some(installed) = &self.installed {
            unsafe { CGEventTapEnable(installed.port.as_concrete_TypeRef(), enabled) }
        }
    }

    fn uninstall(&mut self) {
        if let Some(installed) = self.installed.take() {
            unsafe {
                CGEventTapEnable(installed.port.as_concrete_TypeRef(), false);
                installed
                    .run_loop
                    .remove_source(&installed.source, kCFRunLoopCommonModes);
            }
            debug!("event tap removed");
        }
    }

    fn is_installed(&self) -> bool {
        self.installed.is_some()
    }
}

impl Drop for EventTap {
    fn drop(&mut self) {
        self.uninstall();
    }
}

fn cg_placement(placement: TapPlacement) -> CGEventTapPlacement {
    match placement {
        TapPlacement::HeadInsert => CGEventTapPlacement::HeadInsertEventTap,
        TapPlacement::TailAppend => CGEventTapPlacement::TailAppendEventTap,
    }
}

unsafe fn captured_event(event_type: u32, event: CGEventRef) -> CapturedEvent {
    let kind = match event_type {
        KEY_DOWN => EventKind::KeyDown,
        KEY_UP => EventKind::KeyUp,
        FLAGS_CHANGED => EventKind::FlagsChanged,
        TAP_DISABLED_BY_TIMEOUT => EventKind::TapDisabled(DisableReason::Timeout),
        TAP_DISABLED_BY_USER_INPUT => EventKind::TapDisabled(DisableReason::UserInput),
        _ => EventKind::Other,
    };

    let key_code = match kind {
        EventKind::KeyDown | EventKind::KeyUp | EventKind::FlagsChanged if !event.is_null() => {
            let raw = CGEventGetIntegerValueField(event, EventField::KEYBOARD_EVENT_KEYCODE);
            codes::from_raw(raw)
        }
        _ => 0,
    };

    CapturedEvent { kind, key_code }
}

/// C callback: must return quickly or the OS disables the tap
unsafe extern "C" fn tap_callback(
    _proxy: *const c_void,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef {
    if user_info.is_null() {
        return event;
    }
    let context = &*(user_info as *const TapContext);
    let captured = captured_event(event_type, event);

    let decision = panic::catch_unwind(AssertUnwindSafe(|| {
        match context.handler.try_borrow_mut() {
            Ok(mut handler) => {
                let handler = &mut *handler;
                handler(&captured, &PortControl(context.port.get()))
            }
            Err(_) => Decision::PassThrough,
        }
    }))
    .unwrap_or_else(|_| {
        error!("event handler panicked, passing event through");
        Decision::PassThrough
    });

    match decision {
        Decision::PassThrough => event,
        Decision::Suppress | Decision::Rearm => ptr::null_mut(),
    }
}
